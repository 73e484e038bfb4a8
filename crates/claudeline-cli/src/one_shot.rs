//! Single prompt on the terminal
//!
//! Streams the reply to stdout and asks on the terminal whenever the agent
//! needs a permission or an answer. Ctrl-C cancels the run.

use std::io::{self, Write};
use std::sync::Arc;

use anyhow::Context;
use console::style;
use dialoguer::{Input, Select, theme::ColorfulTheme};
use tracing::debug;

use claudeline_core::session::{
    Answers, PermissionDecision, QuestionInfo, SessionController, SessionOutput, output_channel,
};

const OTHER_ANSWER: &str = "Other (type an answer)";

/// Run `prompt` to completion. Returns whether it succeeded.
pub async fn run(controller: Arc<SessionController>, prompt: &str) -> anyhow::Result<bool> {
    let (tx, mut rx) = output_channel();
    let runner = controller.clone();
    let prompt = prompt.to_string();
    let execution = tokio::spawn(async move { runner.execute(prompt, tx).await });

    loop {
        let output = tokio::select! {
            output = rx.recv() => output,
            _ = tokio::signal::ctrl_c() => {
                eprintln!("\n{}", style("Cancelling...").yellow());
                controller.cancel();
                continue;
            }
        };
        let Some(output) = output else { break };

        match output {
            SessionOutput::Chunk { text } => {
                print!("{}", text);
                std::io::stdout().flush()?;
            }
            SessionOutput::PermissionRequest {
                tool_name,
                description,
                ..
            } => {
                let decision =
                    prompt_or_cancel(&controller, move || ask_permission(&tool_name, &description))
                        .await?;
                if let Some(decision) = decision {
                    controller.resolve_permission(decision);
                }
            }
            SessionOutput::AskUser { questions } => {
                let answers =
                    prompt_or_cancel(&controller, move || ask_questions(&questions)).await?;
                if let Some(answers) = answers {
                    controller.resolve_answer(answers);
                }
            }
            SessionOutput::ModeChanged { mode } => {
                eprintln!("{}", style(format!("[mode: {}]", mode)).dim());
            }
        }
    }

    let result = execution.await.context("execution task failed")?;
    println!();
    if let Some(error) = &result.error {
        eprintln!("{}", style(format!("Error: {}", error)).red());
    }
    debug!(success = result.success, "One-shot run finished");
    Ok(result.success)
}

/// Run a blocking terminal prompt. Ctrl-C, whether caught by the prompt or
/// by the signal handler, cancels the run and yields `None`.
async fn prompt_or_cancel<T, F>(controller: &SessionController, ask: F) -> anyhow::Result<Option<T>>
where
    T: Send + 'static,
    F: FnOnce() -> anyhow::Result<T> + Send + 'static,
{
    let prompt = tokio::task::spawn_blocking(ask);
    let answer = tokio::select! {
        answer = prompt => answer.context("prompt task failed")?,
        _ = tokio::signal::ctrl_c() => Err(io::Error::from(io::ErrorKind::Interrupted).into()),
    };
    match answer {
        Ok(answer) => Ok(Some(answer)),
        Err(e) if is_interrupted(&e) => {
            eprintln!("\n{}", style("Cancelling...").yellow());
            controller.cancel();
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

fn is_interrupted(error: &anyhow::Error) -> bool {
    if let Some(dialoguer::Error::IO(e)) = error.downcast_ref::<dialoguer::Error>() {
        return e.kind() == io::ErrorKind::Interrupted;
    }
    error
        .downcast_ref::<io::Error>()
        .is_some_and(|e| e.kind() == io::ErrorKind::Interrupted)
}

fn ask_permission(tool_name: &str, description: &str) -> anyhow::Result<PermissionDecision> {
    eprintln!();
    eprintln!(
        "{} {}",
        style("Permission needed:").yellow().bold(),
        style(description).cyan()
    );
    let choices = [
        "Allow".to_string(),
        format!("Allow {} for this session", tool_name),
        "Deny".to_string(),
    ];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What should Claude do?")
        .items(&choices)
        .default(0)
        .interact()?;

    Ok(match selection {
        0 => PermissionDecision::allow(),
        1 => PermissionDecision::allow_session(),
        _ => PermissionDecision::deny(None),
    })
}

fn ask_questions(questions: &[QuestionInfo]) -> anyhow::Result<Answers> {
    let mut answers = Answers::new();
    for question in questions {
        eprintln!();
        if let Some(header) = &question.header {
            eprintln!("{}", style(header).bold());
        }

        let answer = if question.options.is_empty() {
            Input::<String>::with_theme(&ColorfulTheme::default())
                .with_prompt(&question.question)
                .interact_text()?
        } else {
            let mut items: Vec<String> = question
                .options
                .iter()
                .map(|option| match &option.description {
                    Some(description) => format!("{} - {}", option.label, description),
                    None => option.label.clone(),
                })
                .collect();
            items.push(OTHER_ANSWER.to_string());

            let selection = Select::with_theme(&ColorfulTheme::default())
                .with_prompt(&question.question)
                .items(&items)
                .default(0)
                .interact()?;
            match question.options.get(selection) {
                Some(option) => option.label.clone(),
                None => Input::<String>::with_theme(&ColorfulTheme::default())
                    .with_prompt("Your answer")
                    .interact_text()?,
            }
        };
        answers.insert(question.question.clone(), answer);
    }
    Ok(answers)
}
