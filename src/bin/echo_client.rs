use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use framesock::{
    AppResult, Client, ClientConfig, Packet, PacketCodec, SequenceGenerator, Session,
    SessionEvents,
};

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
    /// text to send
    #[arg(short, long, default_value = "hello")]
    pub message: String,
    /// how many times to send it
    #[arg(short = 'n', long, default_value_t = 1)]
    pub count: u32,
}

struct PrintEvents;

impl SessionEvents<PacketCodec> for PrintEvents {
    fn on_received(&self, _session: &Arc<Session<PacketCodec>>, frame: Packet) {
        info!("recv {}", frame);
    }

    fn on_sent(&self, _session: &Arc<Session<PacketCodec>>, frame: &Packet) {
        info!("sent {}", frame);
    }

    fn on_closed(&self, session: &Arc<Session<PacketCodec>>) {
        info!(session = %session, "closed");
    }

    fn on_log(&self, line: &str) {
        info!("{}", line);
    }
}

#[tokio::main]
async fn main() -> AppResult<()> {
    let commandline = CommandLine::parse();
    let directive = match commandline.verbose {
        0 => "info",
        1 => "info,framesock=debug",
        _ => "trace",
    };
    framesock::setup_local_tracing(directive)?;

    let config = match &commandline.conf {
        Some(path) => ClientConfig::from_file(path)?,
        None => ClientConfig::default(),
    };
    let codec = Arc::new(PacketCodec::new(config.max_frame_size));
    let client = Client::new(config, codec, Arc::new(PrintEvents));
    client.connect().await?;

    // the client owns the sequence ids for the packets it constructs
    let sequences = SequenceGenerator::new();

    // verify the link before sending anything
    client.send(&Packet::linktest_req(&sequences)).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    for i in 0..commandline.count {
        let payload = if commandline.count > 1 {
            format!("{} #{}", commandline.message, i + 1)
        } else {
            commandline.message.clone()
        };
        client.send(&Packet::send_req(&sequences, payload)).await?;
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    // give the last reply a moment to arrive
    tokio::time::sleep(Duration::from_millis(300)).await;
    client.disconnect().await;
    Ok(())
}
