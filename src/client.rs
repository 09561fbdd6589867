use anyhow::{Context, Result};
use tokio::{
    io::{self, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader},
    net::{TcpStream, tcp::OwnedWriteHalf},
    select,
};
use tracing::warn;

use crate::{
    cli::ClientArgs,
    frame::{self, Framer},
};

/// Terminal client: multiplexes stdin lines and inbound frames. Outgoing
/// lines are framed and sent; inbound frames are printed one per line,
/// already attributed by the server.
pub async fn run(args: ClientArgs) -> Result<()> {
    let stream = TcpStream::connect(args.server)
        .await
        .with_context(|| format!("failed to connect to {}", args.server))?;
    let (mut reader, mut writer) = stream.into_split();

    write_stdout(&format!("*** connected to {}", args.server)).await?;

    let mut framer = Framer::new();
    let mut buffer = vec![0u8; 1024];
    let mut stdin = BufReader::new(tokio::io::stdin());
    let mut input = String::new();

    loop {
        input.clear();
        select! {
            read_result = reader.read(&mut buffer) => {
                if !handle_server_bytes(read_result, &buffer, &mut framer).await? {
                    break;
                }
            }
            bytes_read = stdin.read_line(&mut input) => {
                if !handle_stdin_input(bytes_read, &input, &mut writer).await? {
                    break;
                }
            }
            ctrl_c = tokio::signal::ctrl_c() => {
                if let Err(error) = ctrl_c {
                    warn!(?error, "ctrl-c handler failed");
                }
                break;
            }
        }
    }

    if let Err(error) = writer.shutdown().await {
        warn!(?error, "failed to shutdown client writer cleanly");
    }

    Ok(())
}

async fn handle_server_bytes(
    read_result: io::Result<usize>,
    buffer: &[u8],
    framer: &mut Framer,
) -> Result<bool> {
    let bytes_read = read_result?;
    if bytes_read == 0 {
        write_stdout("*** server closed the connection").await?;
        return Ok(false);
    }

    for payload in framer.push(&buffer[..bytes_read]) {
        write_stdout(&String::from_utf8_lossy(&payload)).await?;
    }
    Ok(true)
}

async fn handle_stdin_input(
    bytes_read: io::Result<usize>,
    input: &str,
    writer: &mut OwnedWriteHalf,
) -> Result<bool> {
    let bytes_read = bytes_read?;
    if bytes_read == 0 {
        return Ok(false);
    }

    let text = input.trim_end();
    if text.is_empty() {
        return Ok(true);
    }

    if text.eq_ignore_ascii_case("/quit") {
        write_stdout("*** leaving chat").await?;
        return Ok(false);
    }

    writer.write_all(&frame::encode(text.as_bytes())).await?;
    writer.flush().await?;
    Ok(true)
}

async fn write_stdout(line: &str) -> io::Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(line.as_bytes()).await?;
    stdout.write_all(b"\n").await?;
    stdout.flush().await
}
