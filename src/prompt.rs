use crate::purge::{PurgeChoice, PurgeConfirm, PurgeRequest, PurgeSafety};
use anyhow::{Context, Result};
use async_trait::async_trait;
use crossterm::style::Stylize;
use std::io::{self, BufRead, Write};

const PREVIEW_FILES: usize = 10;

/// Asks on the terminal. Anything but an explicit yes cancels.
pub struct TerminalConfirm;

#[async_trait]
impl PurgeConfirm for TerminalConfirm {
    async fn confirm(&self, request: &PurgeRequest<'_>) -> Result<PurgeChoice> {
        let message = render(request);
        let answer = tokio::task::spawn_blocking(move || -> Result<String> {
            let mut stderr = io::stderr().lock();
            write!(stderr, "{message}").context("write purge prompt")?;
            stderr.flush().context("flush purge prompt")?;
            let mut line = String::new();
            io::stdin()
                .lock()
                .read_line(&mut line)
                .context("read purge answer")?;
            Ok(line)
        })
        .await
        .context("purge prompt task")??;

        Ok(parse_answer(&answer))
    }
}

/// Purges without asking (`--yes`).
pub struct AutoConfirm;

#[async_trait]
impl PurgeConfirm for AutoConfirm {
    async fn confirm(&self, request: &PurgeRequest<'_>) -> Result<PurgeChoice> {
        tracing::info!(
            safety = request.safety.label(),
            files = request.files.len(),
            "purge confirmed from the command line"
        );
        Ok(PurgeChoice::Purge)
    }
}

fn render(request: &PurgeRequest<'_>) -> String {
    let mut out = String::new();
    let heading = match request.safety {
        PurgeSafety::Safe => "Foreign deployment found".yellow().bold().to_string(),
        PurgeSafety::Unsafe => "Unsafe purge required".red().bold().to_string(),
    };
    out.push_str(&heading);
    out.push('\n');
    out.push_str(request.safety.prompt_text());
    out.push_str("\n\n");
    out.push_str(&format!("Target:   {}\n", request.target_dir.display()));
    if !request.mod_type.is_empty() {
        out.push_str(&format!("Mod type: {}\n", request.mod_type));
    }
    let foreign = if request.foreign_instance.is_empty() {
        "unknown"
    } else {
        request.foreign_instance
    };
    out.push_str(&format!("Deployed by instance: {foreign}\n"));
    out.push_str(&format!(
        "Method:   {}\n",
        request.deployment_method.unwrap_or("unknown")
    ));
    out.push_str(&format!("Files ({}):\n", request.files.len()));
    for file in request.files.iter().take(PREVIEW_FILES) {
        out.push_str(&format!("  {}  [{}]\n", file.rel_path, file.source));
    }
    if request.files.len() > PREVIEW_FILES {
        out.push_str(&format!("  ... and {} more\n", request.files.len() - PREVIEW_FILES));
    }
    out.push_str("Purge these files? [y/N] ");
    out
}

fn parse_answer(answer: &str) -> PurgeChoice {
    match answer.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => PurgeChoice::Purge,
        _ => PurgeChoice::Cancel,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::DeployedFile;
    use std::path::Path;

    #[test]
    fn only_explicit_yes_purges() {
        assert_eq!(parse_answer("y\n"), PurgeChoice::Purge);
        assert_eq!(parse_answer(" YES "), PurgeChoice::Purge);
        assert_eq!(parse_answer("\n"), PurgeChoice::Cancel);
        assert_eq!(parse_answer("no"), PurgeChoice::Cancel);
        assert_eq!(parse_answer("yess"), PurgeChoice::Cancel);
    }

    #[test]
    fn render_truncates_long_file_lists() {
        let files: Vec<DeployedFile> = (0..12)
            .map(|index| DeployedFile::new(format!("Data/{index}.txt"), "mod", 1.0))
            .collect();
        let request = PurgeRequest {
            safety: PurgeSafety::Unsafe,
            target_dir: Path::new("/games/bg3/Data"),
            mod_type: "",
            foreign_instance: "",
            instance: "me",
            deployment_method: None,
            files: &files,
        };
        let text = render(&request);
        assert!(text.contains("cannot be undone"));
        assert!(text.contains("Deployed by instance: unknown"));
        assert!(text.contains("Data/9.txt"));
        assert!(!text.contains("Data/10.txt"));
        assert!(text.contains("... and 2 more"));
        assert!(!text.contains("Mod type:"));
    }
}
