use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use ulid::Ulid;

use crate::engine::{Engine, EngineError};
use crate::limits::{MAX_LINE_LEN, MAX_LISTENS_PER_CONNECTION};
use crate::model::*;
use crate::observability::{self, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS, PROTOCOL_ERRORS_TOTAL};
use crate::protocol::{parse_command, Command, ProtocolError, Push, Reply};

const PUSH_BUFFER: usize = 256;

type Lines<S> = Framed<S, LinesCodec>;

/// Per-connection subscriptions: one forwarding task per listened slot.
struct Listens {
    tx: mpsc::Sender<SlotChange>,
    tasks: HashMap<Ulid, JoinHandle<()>>,
}

impl Listens {
    fn listen(&mut self, engine: &Engine, slot_id: Ulid) -> Reply {
        if self.tasks.contains_key(&slot_id) {
            return Reply::empty();
        }
        if self.tasks.len() >= MAX_LISTENS_PER_CONNECTION {
            return Reply::from(&ProtocolError::TooManyListens);
        }
        if engine.slots.get(&slot_id).is_none() {
            return Reply::from(&EngineError::NotFound(format!("slot {slot_id}")));
        }
        let rx = engine.notify.subscribe(slot_id);
        self.tasks.insert(slot_id, tokio::spawn(forward(slot_id, rx, self.tx.clone())));
        Reply::empty()
    }

    fn unlisten(&mut self, slot_id: Ulid) -> Reply {
        if let Some(task) = self.tasks.remove(&slot_id) {
            task.abort();
        }
        Reply::empty()
    }
}

impl Drop for Listens {
    fn drop(&mut self) {
        for (_, task) in self.tasks.drain() {
            task.abort();
        }
    }
}

async fn forward(slot_id: Ulid, mut rx: broadcast::Receiver<SlotChange>, tx: mpsc::Sender<SlotChange>) {
    loop {
        match rx.recv().await {
            Ok(change) => {
                if tx.send(change).await.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(%slot_id, skipped, "listener lagged, slot changes dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

async fn send<S, T>(framed: &mut Lines<S>, message: &T) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
    T: Serialize,
{
    let line = serde_json::to_string(message)
        .map_err(|e| LinesCodecError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e)))?;
    framed.send(line).await
}

/// Serve one client: newline-delimited JSON requests in, one reply line per
/// request out, interleaved with pushes for listened slots. Returns once the
/// client hangs up or `shutdown` fires; a request in flight is answered first.
pub async fn process_connection<S>(
    stream: S,
    engine: Arc<Engine>,
    shutdown: CancellationToken,
) -> Result<(), LinesCodecError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (tx, mut pushes) = mpsc::channel(PUSH_BUFFER);
    let mut listens = Listens {
        tx,
        tasks: HashMap::new(),
    };

    loop {
        tokio::select! {
            line = framed.next() => {
                let line = match line {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        metrics::counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
                        send(&mut framed, &Reply::error("PROTOCOL_ERROR", "request line too long")).await?;
                        break;
                    }
                    Some(Err(e)) => return Err(e),
                };
                if line.trim().is_empty() {
                    continue;
                }
                let reply = handle_line(&engine, &mut listens, &line).await;
                send(&mut framed, &reply).await?;
            }
            Some(change) = pushes.recv() => {
                send(&mut framed, &Push::slot_changed(change)).await?;
            }
            _ = shutdown.cancelled() => {
                debug!("server shutting down, closing connection");
                break;
            }
        }
    }

    drop(listens);
    engine.notify.prune();
    Ok(())
}

async fn handle_line(engine: &Engine, listens: &mut Listens, line: &str) -> Reply {
    let cmd = match parse_command(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            metrics::counter!(PROTOCOL_ERRORS_TOTAL).increment(1);
            debug!("rejected request line: {e}");
            return Reply::from(&e);
        }
    };

    let label = observability::command_label(&cmd);
    let start = Instant::now();
    let reply = match cmd {
        Command::Listen { slot_id } => listens.listen(engine, slot_id),
        Command::Unlisten { slot_id } => listens.unlisten(slot_id),
        other => match execute(engine, other).await {
            Ok(reply) => reply,
            Err(e) => {
                if e.is_client_error() {
                    debug!(command = label, "{e}");
                } else {
                    error!(command = label, "{e}");
                }
                Reply::from(&e)
            }
        },
    };

    let status = if reply.ok { "ok" } else { "error" };
    metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);
    metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label).record(start.elapsed().as_secs_f64());
    reply
}

async fn execute(engine: &Engine, cmd: Command) -> Result<Reply, EngineError> {
    Ok(match cmd {
        Command::CreateBranch {
            id,
            name,
            address,
            phone,
            email,
            operating_hours,
        } => {
            let branch = Branch {
                id: id.unwrap_or_else(Ulid::new),
                name,
                address,
                phone,
                email,
                operating_hours,
            };
            Reply::data(&engine.create_branch(branch).await?)
        }
        Command::CreateSlot {
            id,
            branch_id,
            date,
            start_time,
            end_time,
            capacity,
        } => {
            let slot = TimeSlot::new(id.unwrap_or_else(Ulid::new), branch_id, date, start_time, end_time, capacity);
            Reply::data(&engine.create_slot(slot).await?)
        }
        Command::Book(req) => Reply::data(&engine.book_appointment(req).await?),
        Command::Cancel { reference } => Reply::data(&engine.cancel_appointment(&reference).await?),
        Command::Get { reference } => Reply::data(&engine.get_by_reference(&reference).await?),
        Command::ListAppointments { customer } => Reply::data(&engine.list_by_customer(&customer).await?),
        Command::AvailableSlots { branch_id, date } => Reply::data(&engine.available_slots(branch_id, date).await?),
        Command::ListBranches => Reply::data(&engine.list_branches()),
        Command::ListSlots { branch_id, from, to } => {
            Reply::data(&engine.slots_between(branch_id, from, to).await?)
        }
        Command::Ping => Reply::data(&"pong"),
        // Connection-scoped, answered by the caller
        Command::Listen { .. } | Command::Unlisten { .. } => Reply::empty(),
    })
}
