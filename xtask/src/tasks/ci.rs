use colored::Colorize;
use std::{
    env,
    process::{Command, ExitStatus, Stdio},
};

use crate::{project_root, DynError};

/// Each step runs from the workspace root. The first failing step stops the run.
pub fn ci() -> Result<(), DynError> {
    let steps = [
        ("formatting", vec!["fmt", "--all", "--", "--check"]),
        ("cargo check", vec!["check", "--workspace", "--all-targets"]),
        (
            "cargo clippy",
            vec!["clippy", "--workspace", "--all-targets", "--", "-D", "warnings"],
        ),
        ("unit tests", vec!["test", "--package", "replset_client", "--lib"]),
        ("doc tests", vec!["test", "--package", "replset_client", "--doc"]),
        ("demo build", vec!["build", "--package", "replset_client", "--examples"]),
    ];

    for (name, args) in steps {
        println!("{}", format!("Running {}...", name).truecolor(255, 165, 0));
        let status = cargo_command(&args).status()?;
        if !status.success() {
            print_failure(name, status);
            return Err(format!("`{}` failed", name).into());
        }
    }

    println!("{}", "All checks passed".green());
    Ok(())
}

fn print_failure(step: &str, status: ExitStatus) {
    let code = status
        .code()
        .map(|c| c.to_string())
        .unwrap_or_else(|| "<< no status code >>".to_string());
    println!(
        "{} `{}` finished with a non-zero status code: {}",
        "Error:".red(),
        step.blue(),
        code
    );
}

fn cargo_command(args: &[&str]) -> Command {
    let cargo = env::var("CARGO").unwrap_or_else(|_| "cargo".to_string());
    let mut cmd = Command::new(cargo);
    cmd.current_dir(project_root())
        .args(args)
        .stdout(Stdio::inherit());
    cmd
}
