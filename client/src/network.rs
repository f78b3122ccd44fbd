//! Connection handling for the racing client: the join handshake and the
//! framed stream the race is played over.

use crate::game::{RaceEvent, RaceState, RemoteCar};
use log::{info, warn};
use shared::framing::{read_frame, write_frame, WireError};
use shared::{Packet, Vec2};
use std::fmt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{timeout, Duration};

/// Bounded wait for the server's admission verdict.
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Why joining the session failed. All of these are recoverable "could not
/// join" conditions for the user, not crashes.
#[derive(Debug)]
pub enum JoinError {
    /// The username is taken (or reserved); pick another and retry.
    NameTaken,
    /// The session already seats its full player count.
    SessionFull,
    /// No verdict arrived within `JOIN_TIMEOUT`.
    Timeout,
    /// The server answered with something that is not a verdict.
    UnexpectedReply(Packet),
    Wire(WireError),
}

impl fmt::Display for JoinError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JoinError::NameTaken => write!(f, "the username is taken, try again"),
            JoinError::SessionFull => write!(f, "the session is already full"),
            JoinError::Timeout => write!(f, "timed out waiting for the server"),
            JoinError::UnexpectedReply(packet) => {
                write!(f, "unexpected reply from the server: {:?}", packet)
            }
            JoinError::Wire(e) => write!(f, "connection problem: {}", e),
        }
    }
}

impl std::error::Error for JoinError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            JoinError::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<WireError> for JoinError {
    fn from(e: WireError) -> Self {
        JoinError::Wire(e)
    }
}

impl From<std::io::Error> for JoinError {
    fn from(e: std::io::Error) -> Self {
        JoinError::Wire(WireError::Io(e))
    }
}

/// A joined participant: the framed stream plus the local race state it
/// feeds.
///
/// Inbound frames are decoded on a dedicated task and handed over a
/// channel, so [`RaceClient::next_event`] can sit in a `select!` without
/// ever abandoning a half-read frame.
#[derive(Debug)]
pub struct RaceClient {
    packets_rx: mpsc::UnboundedReceiver<Packet>,
    reader: JoinHandle<()>,
    writer: OwnedWriteHalf,
    state: RaceState,
}

impl RaceClient {
    /// Connects, introduces `username` and waits (bounded) for the
    /// verdict. On success the local state is seeded with our confirmed
    /// starting slot.
    pub async fn connect(addr: &str, username: &str) -> Result<Self, JoinError> {
        let stream = TcpStream::connect(addr).await?;
        let (mut read_half, mut writer) = stream.into_split();

        write_frame(
            &mut writer,
            &Packet::FirstConnection {
                username: username.to_string(),
            },
        )
        .await?;

        let verdict = match timeout(JOIN_TIMEOUT, read_frame(&mut read_half)).await {
            Ok(result) => result?,
            Err(_) => return Err(JoinError::Timeout),
        };

        match verdict {
            Packet::UsernameConfirmed {
                position,
                heading,
                color,
            } => {
                info!("username confirmed, {} is in the session", username);
                let (packets_rx, reader) = spawn_reader(read_half);
                Ok(Self {
                    packets_rx,
                    reader,
                    writer,
                    state: RaceState::new(
                        username,
                        RemoteCar {
                            position,
                            heading,
                            color,
                        },
                    ),
                })
            }
            Packet::UsernameRejected => Err(JoinError::NameTaken),
            Packet::MaxPlayersReached => Err(JoinError::SessionFull),
            other => Err(JoinError::UnexpectedReply(other)),
        }
    }

    /// Waits for the next server packet that changes something and returns
    /// the resulting event. Safe to race against other futures in a
    /// `select!`. A closed channel means the server connection is gone.
    pub async fn next_event(&mut self) -> Result<RaceEvent, WireError> {
        loop {
            let Some(packet) = self.packets_rx.recv().await else {
                return Err(WireError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "the server connection closed",
                )));
            };
            if let Some(event) = self.state.apply(packet) {
                return Ok(event);
            }
        }
    }

    /// Reports our movement state to the server.
    pub async fn send_position(&mut self, position: Vec2, heading: f32) -> Result<(), WireError> {
        self.state.set_local_position(position, heading);
        write_frame(
            &mut self.writer,
            &Packet::UpdatePosition {
                username: self.state.username().to_string(),
                position,
                heading,
            },
        )
        .await
    }

    /// Reports a checkpoint crossing.
    pub async fn send_checkpoint(&mut self, checkpoint: u8) -> Result<(), WireError> {
        write_frame(
            &mut self.writer,
            &Packet::CheckpointPassed {
                username: self.state.username().to_string(),
                checkpoint,
            },
        )
        .await
    }

    /// Tells the server our finish rule fired.
    pub async fn send_race_completed(&mut self) -> Result<(), WireError> {
        write_frame(
            &mut self.writer,
            &Packet::RaceCompleted {
                username: self.state.username().to_string(),
            },
        )
        .await
    }

    /// The read-only race snapshot for presentation.
    pub fn state(&self) -> &RaceState {
        &self.state
    }
}

impl Drop for RaceClient {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Decodes frames off the read half until the stream dies. Malformed
/// frames are dropped and reading continues; everything else ends the
/// task, which surfaces to `next_event` as a closed channel.
fn spawn_reader(
    mut read_half: OwnedReadHalf,
) -> (mpsc::UnboundedReceiver<Packet>, JoinHandle<()>) {
    let (packets_tx, packets_rx) = mpsc::unbounded_channel();

    let reader = tokio::spawn(async move {
        loop {
            match read_frame(&mut read_half).await {
                Ok(packet) => {
                    if packets_tx.send(packet).is_err() {
                        break;
                    }
                }
                Err(e) if e.is_frame_local() => warn!("dropping malformed frame: {}", e),
                Err(e) => {
                    info!("server connection closed: {}", e);
                    break;
                }
            }
        }
    });

    (packets_rx, reader)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::{CAR_COLORS, GRID_POSITIONS, START_HEADING};
    use tokio::net::TcpListener;

    /// One-shot stand-in for the server's admission controller.
    async fn verdict_server(verdict: Packet) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let hello = read_frame(&mut stream).await.unwrap();
            assert!(matches!(hello, Packet::FirstConnection { .. }));
            write_frame(&mut stream, &verdict).await.unwrap();
            // Keep the stream open until the client is done with it.
            let _ = read_frame(&mut stream).await;
        });

        addr
    }

    #[tokio::test]
    async fn a_confirmed_join_seeds_the_local_state() {
        let addr = verdict_server(Packet::UsernameConfirmed {
            position: GRID_POSITIONS[0],
            heading: START_HEADING,
            color: CAR_COLORS[0],
        })
        .await;

        let client = RaceClient::connect(&addr.to_string(), "jacky").await.unwrap();
        let car = client.state().local_car().unwrap();
        assert_eq!(car.position, GRID_POSITIONS[0]);
        assert_eq!(car.color, CAR_COLORS[0]);
        assert!(!client.state().started());
    }

    #[tokio::test]
    async fn a_taken_name_is_a_recoverable_error() {
        let addr = verdict_server(Packet::UsernameRejected).await;

        let err = RaceClient::connect(&addr.to_string(), "jacky")
            .await
            .unwrap_err();
        assert!(matches!(err, JoinError::NameTaken));
    }

    #[tokio::test]
    async fn a_full_session_is_a_recoverable_error() {
        let addr = verdict_server(Packet::MaxPlayersReached).await;

        let err = RaceClient::connect(&addr.to_string(), "jacky")
            .await
            .unwrap_err();
        assert!(matches!(err, JoinError::SessionFull));
    }

    #[tokio::test]
    async fn a_non_verdict_reply_is_surfaced() {
        let addr = verdict_server(Packet::StartGame).await;

        let err = RaceClient::connect(&addr.to_string(), "jacky")
            .await
            .unwrap_err();
        assert!(matches!(err, JoinError::UnexpectedReply(Packet::StartGame)));
    }
}
