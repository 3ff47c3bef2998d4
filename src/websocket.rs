//! WebSocket 分片上传：每个连接一个会话状态机。
//!
//! 客户端按顺序发送二进制帧，以 1000 关闭帧结束；服务端在每个分片后回
//! `{"Written": n}`，失败时回一次 `{"Error": "..."}` 再关闭连接。

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade, close_code};
use axum::extract::{Extension, Path};
use axum::response::Response;
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Serialize;
use std::fmt::Display;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::atomic::PartFile;
use crate::error::UploadError;
use crate::sanitize::safe_file_name;
use crate::storage::OutputDir;

/// 服务端 → 客户端通知；外部标签序列化，线上格式为
/// `{"Written": 42}` 或 `{"Error": "..."}`。
#[derive(Debug, Serialize)]
pub enum UploadStatus {
    Written(u64),
    Error(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Open,
    Receiving,
    Completed,
    Failed,
}

/// 接收一帧后调用方应执行的动作。
#[derive(Debug, PartialEq, Eq)]
pub enum Step {
    Progress(u64),
    Ignored,
    Finished,
}

pub struct UploadSession {
    raw_name: String,
    state: SessionState,
    writer: Option<PartFile>,
}

impl UploadSession {
    pub fn new(raw_name: impl Into<String>) -> Self {
        Self {
            raw_name: raw_name.into(),
            state: SessionState::Open,
            writer: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// `Open` → `Receiving`：清洗文件名、解析可用路径、打开 `.part` 文件。
    pub async fn begin(&mut self, output: &OutputDir) -> Result<(), UploadError> {
        let name = safe_file_name(&self.raw_name)?;
        let target = output.resolve_available(&name).await?;
        let writer = PartFile::create(&target).await?;
        info!(
            name,
            temp = ?writer.temp_path(),
            out = ?writer.target(),
            "uploading using websockets"
        );
        self.writer = Some(writer);
        self.state = SessionState::Receiving;
        Ok(())
    }

    /// 向会话输入一个入站帧。
    pub async fn accept(&mut self, message: Message) -> Result<Step, UploadError> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| UploadError::Protocol("upload session is not receiving".into()))?;
        match message {
            Message::Binary(payload) => {
                let written = writer.write_chunk(&payload).await?;
                Ok(Step::Progress(written))
            }
            Message::Ping(_) | Message::Pong(_) => Ok(Step::Ignored),
            Message::Close(Some(frame)) if frame.code == close_code::NORMAL => Ok(Step::Finished),
            Message::Close(Some(frame)) => Err(UploadError::AbnormalClose(frame.code)),
            Message::Close(None) => Err(UploadError::AbnormalClose(close_code::STATUS)),
            Message::Text(_) => Err(UploadError::non_binary()),
        }
    }

    /// `Receiving` → `Completed`：把 `.part` 文件提升为最终文件名。
    pub async fn complete(&mut self) -> Result<(PathBuf, u64), UploadError> {
        let writer = self
            .writer
            .take()
            .ok_or_else(|| UploadError::Protocol("upload session is not receiving".into()))?;
        let written = writer.written();
        match writer.finalize().await {
            Ok(path) => {
                self.state = SessionState::Completed;
                Ok((path, written))
            }
            Err(err) => {
                self.state = SessionState::Failed;
                Err(err)
            }
        }
    }

    /// 进入 `Failed`，若有打开的 `.part` 文件则删除。
    pub async fn abort(&mut self) {
        if let Some(writer) = self.writer.take() {
            writer.cleanup().await;
        }
        self.state = SessionState::Failed;
    }
}

/// `upload-ws/{filename}` 的升级处理器。
pub async fn upload_ws(
    ws: WebSocketUpgrade,
    Path(filename): Path<String>,
    Extension(output): Extension<Arc<OutputDir>>,
) -> Response {
    ws.on_failed_upgrade(|err| warn!(error = %err, "failed to upgrade to websocket"))
        .on_upgrade(move |socket| handle_socket(socket, filename, output))
}

async fn handle_socket(socket: WebSocket, filename: String, output: Arc<OutputDir>) {
    let (sender, receiver) = socket.split();
    let _ = run_session(sender, receiver, &filename, &output).await;
}

/// 在已升级的连接上驱动一次上传直至终态，然后关闭发送端。
pub async fn run_session<Tx, Rx, E>(
    mut sender: Tx,
    mut receiver: Rx,
    raw_name: &str,
    output: &OutputDir,
) -> Result<PathBuf, UploadError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    let mut session = UploadSession::new(raw_name);
    let result = drive(&mut session, &mut sender, &mut receiver, output).await;
    match result {
        Ok((path, written)) => {
            info!(path = ?path, written, "done uploading");
            let _ = sender.close().await;
            Ok(path)
        }
        Err(err) => {
            session.abort().await;
            warn!(name = raw_name, error = %err, "upload failed");
            let status = UploadStatus::Error(err.to_string());
            if let Err(send_err) = send_status(&mut sender, &status).await {
                warn!(error = %send_err, "failed to send error message");
            }
            let _ = sender.close().await;
            Err(err)
        }
    }
}

async fn drive<Tx, Rx, E>(
    session: &mut UploadSession,
    sender: &mut Tx,
    receiver: &mut Rx,
    output: &OutputDir,
) -> Result<(PathBuf, u64), UploadError>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
    Rx: Stream<Item = Result<Message, E>> + Unpin,
    E: Display,
{
    session.begin(output).await?;
    loop {
        let message = match receiver.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(UploadError::Receive(err.to_string())),
            None => return Err(UploadError::AbnormalClose(close_code::ABNORMAL)),
        };
        match session.accept(message).await? {
            Step::Progress(written) => {
                if let Err(err) = send_status(sender, &UploadStatus::Written(written)).await {
                    warn!(error = %err, "failed to send status message");
                }
            }
            Step::Ignored => debug!("control frame ignored"),
            Step::Finished => return session.complete().await,
        }
    }
}

async fn send_status<Tx>(sender: &mut Tx, status: &UploadStatus) -> Result<(), String>
where
    Tx: Sink<Message> + Unpin,
    Tx::Error: Display,
{
    let payload = serde_json::to_string(status).map_err(|err| err.to_string())?;
    sender
        .send(Message::Text(payload.into()))
        .await
        .map_err(|err| err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::ws::CloseFrame;
    use futures_util::{future, sink, stream};
    use serde_json::{Value, json};
    use std::convert::Infallible;
    use std::sync::Mutex;
    use tempfile::tempdir;

    fn make_output() -> (tempfile::TempDir, OutputDir) {
        let temp = tempdir().expect("tempdir");
        let output = OutputDir::new(temp.path().to_path_buf());
        (temp, output)
    }

    fn close(code: u16) -> Message {
        Message::Close(Some(CloseFrame {
            code,
            reason: "".into(),
        }))
    }

    fn binary(data: &'static [u8]) -> Message {
        Message::Binary(data.into())
    }

    async fn run(
        frames: Vec<Message>,
        name: &str,
        output: &OutputDir,
    ) -> (Result<PathBuf, UploadError>, Vec<Value>) {
        let incoming = stream::iter(frames.into_iter().map(Ok::<_, Infallible>));
        run_stream(incoming, name, output).await
    }

    async fn run_stream<Rx>(
        incoming: Rx,
        name: &str,
        output: &OutputDir,
    ) -> (Result<PathBuf, UploadError>, Vec<Value>)
    where
        Rx: Stream<Item = Result<Message, Infallible>> + Unpin,
    {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let outgoing = sink::unfold((), {
            let sent = sent.clone();
            move |(), message: Message| {
                sent.lock().expect("lock").push(message);
                future::ready(Ok::<_, Infallible>(()))
            }
        });
        let result = run_session(outgoing, incoming, name, output).await;
        let sent = std::mem::take(&mut *sent.lock().expect("lock"));
        let statuses = sent
            .into_iter()
            .map(|message| match message {
                Message::Text(text) => serde_json::from_str(text.as_str()).expect("json"),
                other => panic!("unexpected outgoing frame {other:?}"),
            })
            .collect();
        (result, statuses)
    }

    fn dir_entries(output: &OutputDir) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(output.root_path())
            .expect("read dir")
            .map(|entry| entry.expect("entry").file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[tokio::test]
    async fn chunks_are_concatenated_in_order() {
        let (_temp, output) = make_output();
        let frames = vec![
            binary(b"hello "),
            binary(b""),
            binary(b"chunked "),
            binary(b"world"),
            close(1000),
        ];

        let (result, statuses) = run(frames, "report 2024.pdf", &output).await;

        let path = result.expect("upload");
        assert_eq!(path, output.root_path().join("report_2024.pdf"));
        assert_eq!(std::fs::read(&path).expect("read"), b"hello chunked world");
        assert_eq!(
            statuses,
            vec![
                json!({"Written": 6}),
                json!({"Written": 6}),
                json!({"Written": 14}),
                json!({"Written": 19}),
            ]
        );
        assert_eq!(dir_entries(&output), vec!["report_2024.pdf"]);
    }

    #[tokio::test]
    async fn second_upload_gets_prefixed_name() {
        let (_temp, output) = make_output();
        let first = run(vec![binary(b"one"), close(1000)], "report 2024.pdf", &output).await;
        let second = run(vec![binary(b"two"), close(1000)], "report 2024.pdf", &output).await;

        assert_eq!(
            first.0.expect("first"),
            output.root_path().join("report_2024.pdf")
        );
        let second = second.0.expect("second");
        assert_eq!(second, output.root_path().join("0.report_2024.pdf"));
        assert_eq!(std::fs::read(second).expect("read"), b"two");
    }

    #[tokio::test]
    async fn text_frame_fails_upload_and_cleans_up() {
        let (_temp, output) = make_output();
        let frames = vec![
            binary(b"partial"),
            Message::Text("oops".into()),
            binary(b"never written"),
        ];

        let (result, statuses) = run(frames, "a.txt", &output).await;

        assert!(matches!(result, Err(UploadError::Protocol(_))));
        assert_eq!(
            statuses,
            vec![
                json!({"Written": 7}),
                json!({"Error": "non-binary message received"}),
            ]
        );
        assert!(dir_entries(&output).is_empty());
    }

    #[tokio::test]
    async fn abnormal_close_removes_part_file() {
        let (_temp, output) = make_output();
        let (result, statuses) = run(vec![binary(b"abc"), close(1001)], "a.txt", &output).await;

        assert!(matches!(result, Err(UploadError::AbnormalClose(1001))));
        assert_eq!(
            statuses.last(),
            Some(&json!({"Error": "connection closed abnormally (code 1001)"}))
        );
        assert!(dir_entries(&output).is_empty());
    }

    #[tokio::test]
    async fn dropped_connection_fails_upload() {
        let (_temp, output) = make_output();
        let (result, _) = run(vec![binary(b"abc")], "a.txt", &output).await;

        assert!(matches!(result, Err(UploadError::AbnormalClose(_))));
        assert!(dir_entries(&output).is_empty());
    }

    #[tokio::test]
    async fn control_frames_are_ignored() {
        let (_temp, output) = make_output();
        let frames = vec![
            Message::Ping("p".into()),
            binary(b"abc"),
            Message::Pong("p".into()),
            close(1000),
        ];

        let (result, statuses) = run(frames, "a.txt", &output).await;
        assert!(result.is_ok());
        assert_eq!(statuses, vec![json!({"Written": 3})]);
    }

    #[tokio::test]
    async fn existing_part_file_is_fatal() {
        let (_temp, output) = make_output();
        std::fs::write(output.root_path().join("a.txt.part"), b"in flight").expect("write");

        let (result, statuses) = run(vec![binary(b"abc"), close(1000)], "a.txt", &output).await;

        assert!(matches!(result, Err(UploadError::TempFileExists(_))));
        assert_eq!(
            statuses,
            vec![json!({"Error": "temp file \"a.txt.part\" already exists"})]
        );
        assert!(!output.root_path().join("a.txt").exists());
    }

    #[tokio::test]
    async fn finished_part_named_upload_is_kept() {
        let (_temp, output) = make_output();
        let (result, statuses) =
            run(vec![binary(b"film"), close(1000)], "movie.part", &output).await;

        let path = result.expect("upload");
        assert_eq!(path, output.root_path().join("movie.part"));
        assert_eq!(std::fs::read(&path).expect("read"), b"film");
        assert_eq!(statuses, vec![json!({"Written": 4})]);
        assert_eq!(dir_entries(&output), vec!["movie.part"]);
    }

    #[tokio::test]
    async fn promotion_failure_reports_error_and_cleans_up() {
        let (_temp, output) = make_output();
        let target = output.root_path().join("race.bin");
        let frames = vec![binary(b"loser"), close(1000)];
        // 在关闭帧到达前由另一方占用最终文件名。
        let incoming = stream::iter(frames).map({
            let target = target.clone();
            move |message| {
                if matches!(message, Message::Close(_)) {
                    std::fs::write(&target, b"winner").expect("write winner");
                }
                Ok::<_, Infallible>(message)
            }
        });

        let (result, statuses) = run_stream(incoming, "race.bin", &output).await;

        assert!(matches!(result, Err(UploadError::Rename(_))));
        assert_eq!(statuses.first(), Some(&json!({"Written": 5})));
        let error = statuses
            .last()
            .and_then(|status| status["Error"].as_str())
            .expect("error status");
        assert!(error.starts_with("rename temp file to final file"), "{error}");
        assert_eq!(std::fs::read(&target).expect("read"), b"winner");
        assert_eq!(dir_entries(&output), vec!["race.bin"]);
    }

    #[tokio::test]
    async fn session_state_transitions() {
        let (_temp, output) = make_output();
        let mut session = UploadSession::new("x.bin");
        assert_eq!(session.state(), SessionState::Open);

        session.begin(&output).await.expect("begin");
        assert_eq!(session.state(), SessionState::Receiving);
        assert_eq!(
            session.accept(binary(b"1234")).await.expect("accept"),
            Step::Progress(4)
        );
        assert_eq!(
            session.accept(close(1000)).await.expect("accept"),
            Step::Finished
        );
        let (path, written) = session.complete().await.expect("complete");
        assert_eq!(session.state(), SessionState::Completed);
        assert_eq!(written, 4);
        assert_eq!(std::fs::metadata(path).expect("meta").len(), 4);

        let mut failed = UploadSession::new("y.bin");
        failed.begin(&output).await.expect("begin");
        failed.abort().await;
        assert_eq!(failed.state(), SessionState::Failed);
        assert!(!output.root_path().join("y.bin.part").exists());
    }
}
