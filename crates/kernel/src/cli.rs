//! Command-line interface of the `kafkasder` binary.

use std::io::{self, BufRead};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};

use crate::models::user::hash_password;

/// KafkasDer panel server.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the HTTP server (default).
    Serve,

    /// Print an argon2 hash for a users file `password_hash` entry.
    HashPassword {
        /// Password to hash. Read from the first line of stdin when omitted.
        #[arg(long)]
        password: Option<String>,
    },
}

impl Cli {
    /// The subcommand to run, defaulting to `serve`.
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

/// Hash `password`, or the first line of `input` when it is `None`.
pub fn hash_password_command(password: Option<String>, input: impl BufRead) -> Result<String> {
    let password = match password {
        Some(p) => p,
        None => {
            let mut line = String::new();
            let mut input = input;
            input
                .read_line(&mut line)
                .context("failed to read password from stdin")?;
            line.trim_end_matches(['\r', '\n']).to_string()
        }
    };

    if password.is_empty() {
        bail!("password must not be empty");
    }
    hash_password(&password)
}

/// [`hash_password_command`] over the process stdin.
pub fn hash_password_from_stdin(password: Option<String>) -> Result<String> {
    hash_password_command(password, io::stdin().lock())
}
