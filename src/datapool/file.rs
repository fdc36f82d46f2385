use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{error, trace};

use crate::error::{AppError, AppResult, DatapoolError};

use super::Row;

/// Open the file and start the single reader task. Rows stream into the
/// returned bounded channel; the channel closing signals exhaustion.
pub(super) async fn spawn_reader(
    path: String,
    recycle: bool,
    channel_capacity: usize,
    closed_rx: watch::Receiver<bool>,
) -> AppResult<mpsc::Receiver<Row>> {
    let first_pass = open(&path).await?;
    let (tx, rx) = mpsc::channel(channel_capacity);
    tokio::spawn(async move {
        run_reader(path, recycle, first_pass, tx, closed_rx).await;
    });
    Ok(rx)
}

async fn open(path: &str) -> AppResult<File> {
    File::open(path).await.map_err(|err| {
        AppError::datapool(DatapoolError::FileOpen {
            path: path.to_owned(),
            source: err,
        })
    })
}

async fn run_reader(
    path: String,
    recycle: bool,
    first_pass: File,
    tx: mpsc::Sender<Row>,
    mut closed_rx: watch::Receiver<bool>,
) {
    let mut file = Some(first_pass);
    loop {
        let pass_file = match file.take() {
            Some(opened) => opened,
            // Rewind: reopen from the top.
            None => match open(&path).await {
                Ok(opened) => opened,
                Err(err) => {
                    error!("Datapool rewind of {} failed: {}", path, err);
                    return;
                }
            },
        };
        let mut lines = BufReader::new(pass_file).lines();
        loop {
            let next = tokio::select! {
                line = lines.next_line() => line,
                _ = closed_rx.changed() => return,
            };
            match next {
                Ok(Some(line)) => {
                    tokio::select! {
                        sent = tx.send(line) => {
                            if sent.is_err() {
                                return;
                            }
                        }
                        _ = closed_rx.changed() => return,
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    let err = AppError::datapool(DatapoolError::FileRead {
                        path: path.clone(),
                        source: err,
                    });
                    error!("{}", err);
                    // Dropping the sender exhausts consumers; the counter
                    // picks up the skipped starts.
                    return;
                }
            }
        }
        if !recycle {
            trace!("Datapool {} exhausted", path);
            // Dropping the sender delivers EXHAUSTED to consumers.
            return;
        }
    }
}
