use std::sync::Arc;

use clap::Parser;
use tracing::info;

use framesock::{
    protocol_id, AppResult, Packet, PacketCodec, Server, ServerConfig, Session, SessionEvents,
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
}

/// Answers SEND_REQ with its reply and LINKTEST_REQ with a linktest
/// response; everything else is just printed.
struct EchoEvents;

impl SessionEvents<PacketCodec> for EchoEvents {
    fn on_received(&self, session: &Arc<Session<PacketCodec>>, frame: Packet) {
        info!(session = %session, "recv {}", frame);
        let session = session.clone();
        tokio::spawn(async move {
            let response = match frame.protocol_id {
                protocol_id::LINKTEST_REQ => Packet::linktest_rsp(frame.sequence_id),
                protocol_id::SEND_REQ => Packet::reply(&frame),
                _ => return,
            };
            let _ = session.send(&response).await;
        });
    }

    fn on_accepted(&self, session: &Arc<Session<PacketCodec>>) {
        info!(session = %session, "accepted");
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
        Some(path) => ServerConfig::from_file(path)?,
        None => ServerConfig::default(),
    };
    let codec = Arc::new(PacketCodec::new(config.max_frame_size));
    let server = Server::new(config, codec, Arc::new(EchoEvents));

    server.start().await?;
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");
    server.stop().await;
    Ok(())
}
