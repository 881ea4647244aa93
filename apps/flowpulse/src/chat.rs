use std::io::Write;
use std::sync::Arc;

use anyhow::bail;

use flowpulse_protocol::Message;
use flowpulse_stream::{
    CancellationToken, ChatStreamer, StaticSession, StreamHandler, StreamOutcome,
};

use crate::bootstrap::{consumer_config, mode_fields};
use crate::cli::ChatArgs;

/// Writes deltas to stdout as they arrive.
struct StdoutHandler<W: Write> {
    out: W,
}

impl<W: Write> StreamHandler for StdoutHandler<W> {
    fn on_delta(&mut self, text: &str) {
        // A closed stdout only loses output; the stream keeps its own outcome.
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
    }

    fn on_done(&mut self) {
        let _ = writeln!(self.out);
    }

    /// The message itself is reported by `main` through the returned error.
    fn on_error(&mut self, _message: &str) {
        let _ = writeln!(self.out);
    }
}

pub async fn run(args: ChatArgs) -> anyhow::Result<()> {
    let config = consumer_config(&args)?;
    let fields = mode_fields(&args.fields)?;
    let session = Arc::new(StaticSession::new(config.session_token.clone()));
    let streamer = ChatStreamer::connect(config, session, args.function.clone())?;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let mut handler = StdoutHandler {
        out: std::io::stdout().lock(),
    };
    let outcome = streamer
        .stream_chat_with(
            vec![Message::user(args.message.join(" "))],
            fields,
            &mut handler,
            cancel,
        )
        .await;

    match outcome {
        StreamOutcome::Done { .. } => Ok(()),
        StreamOutcome::Errored(err) => Err(err.into()),
        StreamOutcome::Cancelled { fragments } => {
            bail!("cancelled after {fragments} fragments")
        }
    }
}
