use std::future::Future;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

use crate::agent::Agent;
use crate::error::Result;

/// Inputs that end the session, compared case-insensitively
const EXIT_COMMANDS: [&str; 2] = ["salir", "exit"];

fn is_exit(input: &str) -> bool {
    EXIT_COMMANDS
        .iter()
        .any(|command| input.eq_ignore_ascii_case(command))
}

/// Chat with the agent on the terminal until the user leaves
pub async fn run(agent: &Agent) -> io::Result<()> {
    let mut stdout = io::stdout();
    let banner = format!(
        "\nSupabase agent started ({}).\nCommands: 'salir' or 'exit' to quit.\n",
        agent.model()
    );
    stdout.write_all(banner.as_bytes()).await?;
    let stdin = BufReader::new(io::stdin());
    converse(stdin, stdout, |input| async move { agent.run(&input).await }).await
}

/// Read inputs line by line, answer each one and write the replies
///
/// Blank lines are skipped. A failed answer is reported and the loop
/// continues. End of input ends the loop like an exit command.
pub async fn converse<R, W, F, Fut>(reader: R, mut writer: W, mut respond: F) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String>>,
{
    let mut lines = reader.lines();
    loop {
        writer.write_all(b"\nUser: ").await?;
        writer.flush().await?;
        let Some(line) = lines.next_line().await? else {
            debug!("Input closed, leaving the chat");
            writer.write_all(b"\n").await?;
            break;
        };
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if is_exit(input) {
            break;
        }
        match respond(input.to_string()).await {
            Ok(reply) => {
                writer
                    .write_all(format!("Assistant: {reply}\n").as_bytes())
                    .await?
            }
            Err(e) => {
                warn!(code = e.code(), "Agent request failed: {e}");
                writer
                    .write_all(format!("Error in loop: {e}\n").as_bytes())
                    .await?
            }
        }
    }
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    async fn session(input: &str) -> (String, Vec<String>) {
        let mut seen = Vec::new();
        let mut output = Vec::new();
        converse(input.as_bytes(), &mut output, |line| {
            seen.push(line.clone());
            async move {
                if line == "fail" {
                    Err(Error::agent("model unavailable"))
                } else {
                    Ok(format!("echo {line}"))
                }
            }
        })
        .await
        .unwrap();
        (String::from_utf8(output).unwrap(), seen)
    }

    #[tokio::test]
    async fn test_replies_until_exit() {
        let (output, seen) = session("hola\n\n  list projects  \nSALIR\nignored\n").await;
        assert_eq!(seen, vec!["hola", "list projects"]);
        assert!(output.contains("Assistant: echo hola\n"));
        assert!(output.contains("Assistant: echo list projects\n"));
        assert!(!output.contains("ignored"));
    }

    #[tokio::test]
    async fn test_errors_do_not_end_the_loop() {
        let (output, seen) = session("fail\nagain\nexit\n").await;
        assert_eq!(seen, vec!["fail", "again"]);
        assert!(output.contains("Error in loop: Agent error: model unavailable\n"));
        assert!(output.contains("Assistant: echo again\n"));
    }

    #[tokio::test]
    async fn test_end_of_input_leaves() {
        let (output, seen) = session("hola").await;
        assert_eq!(seen, vec!["hola"]);
        assert!(output.ends_with("User: \n"));
    }
}
