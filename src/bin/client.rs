//! Command-file client.
//!
//! Every file given on the command line is played by its own client: the
//! commands are published in file order on one connection and every reply is
//! printed as it arrives.

use anyhow::{Context, bail};
use clap::Parser;
use tokio::io::BufReader;
use tokio::net::TcpStream;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use shardkv::protocol::Message;
use shardkv::queue::wire::{ClientFrame, ServerFrame, read_frame, write_frame};

#[derive(Parser, Debug)]
#[command(name = "shardkv-client", version, about = "Replay command files against a ShardKV server")]
struct Args {
    /// Address of the server's queue service
    #[arg(long, default_value = "127.0.0.1:5672")]
    server: String,

    /// Name of the server's inbound request queue
    #[arg(long, default_value = "rpc_queue")]
    queue: String,

    /// Command files, one client per file
    #[arg(required = true)]
    files: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let mut clients = Vec::with_capacity(args.files.len());
    for (client_id, filename) in args.files.iter().enumerate() {
        info!("Processing commands from file: {}", filename);
        let commands = load_commands(filename)
            .await
            .with_context(|| format!("failed to load commands from file {}", filename))?;
        clients.push(tokio::spawn(run_client(
            client_id,
            args.server.clone(),
            args.queue.clone(),
            commands,
        )));
    }

    let mut failed = false;
    for (client_id, client) in clients.into_iter().enumerate() {
        match client.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!("Client {} failed: {:#}", client_id, e);
                failed = true;
            }
            Err(e) => {
                warn!("Client {} task failed: {}", client_id, e);
                failed = true;
            }
        }
    }

    if failed {
        bail!("one or more clients failed");
    }
    Ok(())
}

async fn load_commands(filename: &str) -> std::io::Result<Vec<String>> {
    let content = tokio::fs::read_to_string(filename).await?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

async fn run_client(
    client_id: usize,
    server: String,
    queue: String,
    commands: Vec<String>,
) -> anyhow::Result<()> {
    let stream = TcpStream::connect(server.as_str())
        .await
        .with_context(|| format!("failed to connect to {}", server))?;
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    let reply_queue = format!("reply_queue_{}", client_id);
    write_frame(
        &mut writer,
        &ClientFrame::Declare {
            queue: reply_queue.clone(),
        },
    )
    .await?;

    let expected = commands.len();
    // Publish from a separate task so replies are consumed while sending
    let publisher = tokio::spawn(async move {
        for (seq, command) in commands.into_iter().enumerate() {
            let correlation_id = format!("{}-{}", client_id, seq);
            let message = Message::new(command, reply_queue.as_str(), correlation_id);
            let frame = ClientFrame::Publish {
                queue: queue.clone(),
                message,
            };
            write_frame(&mut writer, &frame).await?;
        }
        Ok::<_, std::io::Error>(writer)
    });

    let mut received = 0;
    while received < expected {
        let Some(ServerFrame::Delivery { message }) = read_frame(&mut reader).await? else {
            bail!(
                "server closed the connection after {} of {} replies",
                received,
                expected
            );
        };
        received += 1;

        println!("Client {} received reply: {}", client_id, message.body);
        if is_json_array(&message.body) {
            let filename = format!("getAllItemsResponse_client_{}.json", client_id);
            tokio::fs::write(&filename, message.body.as_bytes())
                .await
                .with_context(|| format!("failed to write to file: {}", filename))?;
        }
    }

    // Keep the write half open until every reply is in
    let _writer = publisher.await??;
    Ok(())
}

fn is_json_array(body: &str) -> bool {
    matches!(
        serde_json::from_str::<serde_json::Value>(body),
        Ok(serde_json::Value::Array(_))
    )
}
