//! The per-connection request dispatcher.
//!
//! One dispatcher task owns the packet stream, capabilities, and cleanup
//! context. Tasks arrive on a FIFO and execute strictly one at a time; the
//! dispatcher routes every inbound message to the sub-state machine of the
//! active task, prepends cleanup piggybacks to outbound calls, and enforces
//! the single-outstanding-BREAK marker discipline.

use crate::error::{Error, Result};
use crate::protocol::capabilities::Capabilities;
use crate::protocol::cleanup::CleanupContext;
use crate::protocol::codec::{ReplyAssembler, ReplyEvent};
use crate::protocol::constants::*;
use crate::protocol::exec::{
    can_reexecute, compose_execute_options, process_reply, ExecPhase, QueryOptions, ReplyContext,
};
use crate::protocol::handshake::{handle_control_packet, read_reply, ConnectionState};
use crate::protocol::message::Message;
use crate::protocol::messages::{
    CloseCursorsPiggyback, CreateTempLobMessage, ExecuteMessage, FetchMessage,
    FreeTempLobsPiggyback, MarkerMessage, ReexecuteMessage, SessionReleasePiggyback,
    SimpleFunctionMessage,
};
use crate::protocol::packet::PacketStream;
use crate::protocol::response::ErrorInfo;
use crate::protocol::types::{DataRow, LobLocator};
use crate::statement::Statement;
use crate::stream::{AdaptiveRowBuffer, CancelHandle, QueryResults, RowStream};
use bytes::Bytes;
use tokio::sync::{mpsc, oneshot, watch};

/// A unit of work enqueued on the connection.
pub(crate) enum Task {
    Query(Box<QueryTask>),
    Ping(oneshot::Sender<Result<()>>),
    Commit(oneshot::Sender<Result<()>>),
    Rollback(oneshot::Sender<Result<()>>),
    Close(oneshot::Sender<Result<()>>),
}

pub(crate) struct QueryTask {
    pub statement: Statement,
    pub options: QueryOptions,
    pub results_tx: oneshot::Sender<Result<QueryResults>>,
    pub cancel: CancelHandle,
    pub cancel_rx: watch::Receiver<bool>,
}

/// Marker discipline: at most one BREAK may be outstanding.
#[derive(Debug, Default)]
pub(crate) struct MarkerDiscipline {
    break_outstanding: bool,
    /// A second BREAK was requested while the first awaited its ack.
    break_wanted: bool,
}

impl MarkerDiscipline {
    /// Whether a BREAK should go on the wire for this request.
    pub(crate) fn request_break(&mut self) -> bool {
        if self.break_outstanding {
            self.break_wanted = true;
            false
        } else {
            self.break_outstanding = true;
            true
        }
    }

    /// The server acknowledged the marker exchange.
    pub(crate) fn acknowledged(&mut self) {
        self.break_outstanding = false;
        self.break_wanted = false;
    }

    pub(crate) fn is_outstanding(&self) -> bool {
        self.break_outstanding
    }
}

enum TaskReply {
    Reply(Bytes),
    Cancelled,
}

pub(crate) struct Dispatcher {
    stream: PacketStream,
    caps: Capabilities,
    cleanup: CleanupContext,
    marker: MarkerDiscipline,
    queue: mpsc::Receiver<Task>,
    state: ConnectionState,
    use_pooled_server: bool,
}

impl Dispatcher {
    pub(crate) fn new(
        stream: PacketStream,
        caps: Capabilities,
        queue: mpsc::Receiver<Task>,
        use_pooled_server: bool,
    ) -> Self {
        Self {
            stream,
            caps,
            cleanup: CleanupContext::new(),
            marker: MarkerDiscipline::default(),
            queue,
            state: ConnectionState::ReadyForRequest,
            use_pooled_server,
        }
    }

    /// The connection event loop: execute tasks in FIFO order until the
    /// handle closes or a fatal error tears the connection down.
    pub(crate) async fn run(mut self) {
        while let Some(task) = self.queue.recv().await {
            if !self.state.accepts_requests() {
                let quiescing = self.state != ConnectionState::Closed;
                fail_task(task, || {
                    if quiescing {
                        Error::ClientClosesConnection
                    } else {
                        Error::ClientClosedConnection
                    }
                });
                continue;
            }

            match task {
                Task::Query(query) => {
                    if let Err(fatal) = self.run_query(*query).await {
                        log::warn!("connection torn down: {}", fatal);
                        self.teardown().await;
                    }
                }
                Task::Ping(tx) => {
                    let outcome = self.run_simple(TNS_FUNC_PING).await;
                    self.finish_simple(tx, outcome).await;
                }
                Task::Commit(tx) => {
                    let outcome = self.run_simple(TNS_FUNC_COMMIT).await;
                    self.finish_simple(tx, outcome).await;
                }
                Task::Rollback(tx) => {
                    let outcome = self.run_simple(TNS_FUNC_ROLLBACK).await;
                    self.finish_simple(tx, outcome).await;
                }
                Task::Close(tx) => {
                    let outcome = self.graceful_close().await;
                    let _ = tx.send(outcome);
                    return;
                }
            }
        }

        // handle dropped without an explicit close
        if self.state.accepts_requests() {
            let _ = self.graceful_close().await;
        }
    }

    /// Fatal failure: mark closed and fail everything still queued.
    async fn teardown(&mut self) {
        self.state = ConnectionState::Closing;
        while let Ok(task) = self.queue.try_recv() {
            fail_task(task, || Error::UncleanShutdown);
        }
        let _ = self.stream.shutdown().await;
        self.state = ConnectionState::Closed;
    }

    /// Deliver a simple-op outcome, tearing down on fatal errors.
    async fn finish_simple(&mut self, tx: oneshot::Sender<Result<()>>, outcome: Result<()>) {
        let fatal = outcome.as_ref().err().map(Error::is_fatal).unwrap_or(false);
        let _ = tx.send(outcome);
        if fatal {
            self.teardown().await;
        }
    }

    /// Send one function message with any pending cleanup piggybacked.
    async fn send_with_piggybacks(&mut self, main: &dyn Message) -> Result<()> {
        let cursors = self.cleanup.take_cursors();
        let lobs = self.cleanup.take_temp_lobs();

        let close_piggyback;
        let lob_piggyback;
        let mut parts: Vec<&dyn Message> = Vec::with_capacity(3);
        if !cursors.is_empty() {
            log::debug!("piggybacking close of {} cursors", cursors.len());
            close_piggyback = CloseCursorsPiggyback {
                cursor_ids: &cursors,
                ttc_field_version: self.caps.ttc_field_version,
            };
            parts.push(&close_piggyback);
        }
        if !lobs.is_empty() {
            log::debug!("piggybacking free of {} temp LOBs", lobs.len());
            lob_piggyback = FreeTempLobsPiggyback {
                locators: &lobs,
                ttc_field_version: self.caps.ttc_field_version,
            };
            parts.push(&lob_piggyback);
        }
        parts.push(main);
        self.stream.send_composite(&parts).await
    }

    /// Execute a bodyless function call and digest its reply.
    async fn run_simple(&mut self, function: u8) -> Result<()> {
        let msg = SimpleFunctionMessage {
            function,
            ttc_field_version: self.caps.ttc_field_version,
        };
        self.send_with_piggybacks(&msg).await?;

        let reply = read_reply(&mut self.stream, &mut self.caps).await?;
        let ctx = ReplyContext {
            columns: None,
            num_return_binds: 0,
            num_out_binds: 0,
            ttc_field_version: self.caps.ttc_field_version,
            server_ttc_field_version: self.caps.server_ttc_field_version,
        };
        let digest = process_reply(reply, &ctx)?;
        if let Some(failure) = digest.failure() {
            return Err(failure);
        }
        Ok(())
    }

    /// Create a temporary LOB for an upgraded PL/SQL bind.
    async fn create_temp_lob(&mut self, csfrm: u8) -> Result<LobLocator> {
        let msg = CreateTempLobMessage {
            csfrm,
            ttc_field_version: self.caps.ttc_field_version,
        };
        self.send_with_piggybacks(&msg).await?;
        let reply = read_reply(&mut self.stream, &mut self.caps).await?;

        let mut buf = crate::protocol::buffer::ReadBuffer::new(reply);
        let locator = match buf.read_u8()? {
            TNS_MSG_TYPE_ERROR => {
                return Err(crate::protocol::response::parse_error_as_failure(
                    &mut buf,
                    self.caps.server_ttc_field_version,
                ))
            }
            _ => buf.read_bytes_with_length()?.unwrap_or_default(),
        };
        Ok(LobLocator::new(locator, 0))
    }

    /// Run one statement to completion. `Err` means the connection is dead.
    async fn run_query(&mut self, mut task: QueryTask) -> std::result::Result<(), Error> {
        let stmt = &mut task.statement;

        if let Err(e) = stmt.prepare_for_execute() {
            let _ = task.results_tx.send(Err(e));
            return Ok(());
        }
        if *task.cancel_rx.borrow() {
            let _ = task.results_tx.send(Err(Error::QueryCancelled));
            return Ok(());
        }

        // PL/SQL cannot take oversize string/raw binds; such values travel
        // as temporary LOBs created ahead of the execute and freed through
        // the cleanup context after the call.
        let mut temp_lobs: Vec<LobLocator> = Vec::new();
        if stmt.is_plsql() {
            let upgrades: Vec<u8> = stmt
                .binds()
                .iter()
                .filter_map(|b| b.variable.as_ref())
                .filter_map(|v| v.plsql_lob_upgrade())
                .map(|t| t.csfrm())
                .collect();
            for csfrm in upgrades {
                let locator = self.create_temp_lob(csfrm).await?;
                temp_lobs.push(locator);
            }
        }

        let (options, exec_flags) = compose_execute_options(stmt, &task.options);
        let num_return_binds = stmt.binds().iter().filter(|b| b.is_return_bind).count();
        let num_out_binds = stmt
            .binds()
            .iter()
            .filter(|b| {
                !b.is_return_bind && b.direction != crate::statement::BindDirection::Input
            })
            .count();

        let mut phase = ExecPhase::PendingExecute;
        log::trace!("statement phase {:?}, options {:#x}", phase, options);
        let num_iters = stmt
            .binds()
            .iter()
            .filter(|b| b.is_array)
            .map(|b| b.array_count)
            .max()
            .unwrap_or(1);
        let num_execs = if stmt.is_query() {
            task.options.prefetch_rows
        } else {
            num_iters
        };

        // first round-trip: EXECUTE, or REEXECUTE when the cursor and bind
        // shapes are unchanged
        let sent = if can_reexecute(stmt) {
            let msg = ReexecuteMessage {
                cursor_id: stmt.cursor_id,
                num_iters: num_execs.max(1),
                ttc_field_version: self.caps.ttc_field_version,
                and_fetch: stmt.is_query(),
                binds: stmt.binds(),
            };
            self.send_with_piggybacks(&msg).await
        } else {
            let msg = ExecuteMessage {
                sql: if stmt.cursor_id == 0 || stmt.is_ddl() {
                    Some(stmt.sql().as_bytes())
                } else {
                    None
                },
                cursor_id: stmt.cursor_id,
                options,
                exec_flags,
                num_execs,
                prefetch_rows: if stmt.is_query() {
                    task.options.prefetch_rows
                } else {
                    0
                },
                ttc_field_version: self.caps.ttc_field_version,
                charset_id: self.caps.charset_id,
                binds: stmt.binds(),
                defines: if stmt.requires_define {
                    stmt.columns()
                } else {
                    &[]
                },
            };
            self.send_with_piggybacks(&msg).await
        };
        if let Err(e) = sent {
            let _ = task.results_tx.send(Err(e));
            return Err(Error::connection("write failed during execute"));
        }

        let reply = match self.read_task_reply(&mut task.cancel_rx).await {
            Ok(TaskReply::Reply(reply)) => reply,
            Ok(TaskReply::Cancelled) => {
                self.cleanup.add_cursor(stmt.cursor_id);
                let _ = task.results_tx.send(Err(Error::QueryCancelled));
                return Ok(());
            }
            Err(e) => {
                let _ = task.results_tx.send(Err(e));
                return Err(Error::connection("read failed during execute"));
            }
        };

        let ctx = ReplyContext {
            columns: if stmt.columns().is_empty() {
                None
            } else {
                Some(stmt.columns())
            },
            num_return_binds,
            num_out_binds,
            ttc_field_version: self.caps.ttc_field_version,
            server_ttc_field_version: self.caps.server_ttc_field_version,
        };
        let digest = match process_reply(reply, &ctx) {
            Ok(digest) => digest,
            Err(e) => {
                let _ = task.results_tx.send(Err(e));
                return Err(Error::decoding("undecodable execute reply"));
            }
        };

        if let Some(columns) = &digest.columns {
            stmt.columns = columns.clone();
            // chunked column types need explicit defines on a re-execution
            stmt.requires_define = stmt
                .columns
                .iter()
                .any(|c| c.data_type.uses_chunked_read());
        }
        if let Some(info) = &digest.error {
            if info.cursor_id != 0 {
                stmt.cursor_id = info.cursor_id;
            }
        }
        for locator in temp_lobs {
            self.cleanup.add_temp_lob(locator);
        }

        if let Some(failure) = digest.failure() {
            let fatal = failure.is_fatal();
            self.cleanup.add_cursor(stmt.cursor_id);
            let _ = task.results_tx.send(Err(failure));
            if fatal {
                return Err(Error::connection("fatal server error"));
            }
            return Ok(());
        }

        // hand the consumer its metadata and stream
        let (row_tx, row_rx) = mpsc::channel::<Result<DataRow>>(AdaptiveRowBuffer::MAXIMUM as usize);
        let (affected_tx, affected_rx) = oneshot::channel();
        let (counts_tx, counts_rx) = oneshot::channel();
        let (out_binds_tx, out_binds_rx) = oneshot::channel();
        let results = QueryResults::new(
            stmt.columns.clone(),
            RowStream::new(row_rx, task.cancel.clone()),
            affected_rx,
            counts_rx,
            out_binds_rx,
        );
        if task.results_tx.send(Ok(results)).is_err() {
            // consumer went away before seeing any rows
            self.cleanup.add_cursor(stmt.cursor_id);
            return Ok(());
        }

        phase = ExecPhase::Streaming;
        let mut buffer = AdaptiveRowBuffer::with_target(task.options.array_size);
        let mut last_info: Option<ErrorInfo> = digest.error.clone();
        let mut out_binds = digest.out_binds.clone();
        let mut more_rows = stmt.is_query() && digest.more_rows();
        let mut current = digest;

        loop {
            debug_assert!(matches!(
                phase,
                ExecPhase::Streaming | ExecPhase::FetchRequired
            ));
            for row in std::mem::take(&mut current.rows) {
                tokio::select! {
                    biased;
                    changed = task.cancel_rx.changed() => {
                        if changed.is_ok() && *task.cancel_rx.borrow() {
                            phase = ExecPhase::Cancelling;
                        }
                    }
                    permit = row_tx.reserve() => {
                        match permit {
                            Ok(permit) => permit.send(Ok(row)),
                            // stream dropped by the consumer
                            Err(_) => phase = ExecPhase::Cancelling,
                        }
                    }
                }
                if phase == ExecPhase::Cancelling {
                    break;
                }
            }
            let depth =
                (row_tx.max_capacity() - row_tx.capacity()) as u32;
            buffer.did_yield(depth);

            if phase == ExecPhase::Cancelling {
                if let Err(e) = self.cancel_server_call().await {
                    let _ = row_tx.try_send(Err(e));
                    return Err(Error::connection("cancellation exchange failed"));
                }
                self.cleanup.add_cursor(stmt.cursor_id);
                let _ = row_tx.try_send(Err(Error::QueryCancelled));
                return Ok(());
            }

            if !more_rows {
                break;
            }

            // next FETCH round-trip sized by the adaptive buffer
            if row_tx.capacity() == row_tx.max_capacity() {
                buffer.did_consume(0);
            }
            phase = ExecPhase::FetchRequired;
            let fetch = FetchMessage::new(stmt.cursor_id, buffer.target(), self.caps.ttc_field_version);
            if let Err(e) = self.send_with_piggybacks(&fetch).await {
                let _ = row_tx.try_send(Err(e));
                return Err(Error::connection("write failed during fetch"));
            }

            let reply = match self.read_task_reply(&mut task.cancel_rx).await {
                Ok(TaskReply::Reply(reply)) => reply,
                Ok(TaskReply::Cancelled) => {
                    self.cleanup.add_cursor(stmt.cursor_id);
                    let _ = row_tx.try_send(Err(Error::QueryCancelled));
                    return Ok(());
                }
                Err(e) => {
                    let _ = row_tx.try_send(Err(e));
                    return Err(Error::connection("read failed during fetch"));
                }
            };

            let ctx = ReplyContext {
                columns: Some(stmt.columns()),
                num_return_binds,
                num_out_binds,
                ttc_field_version: self.caps.ttc_field_version,
                server_ttc_field_version: self.caps.server_ttc_field_version,
            };
            current = match process_reply(reply, &ctx) {
                Ok(digest) => digest,
                Err(e) => {
                    let _ = row_tx.try_send(Err(e));
                    return Err(Error::decoding("undecodable fetch reply"));
                }
            };
            if let Some(failure) = current.failure() {
                let fatal = failure.is_fatal();
                self.cleanup.add_cursor(stmt.cursor_id);
                let _ = row_tx.try_send(Err(failure));
                if fatal {
                    return Err(Error::connection("fatal server error"));
                }
                return Ok(());
            }
            if current.out_binds.is_some() {
                out_binds = current.out_binds.clone();
            }
            if current.error.is_some() {
                last_info = current.error.clone();
            }
            more_rows = current.more_rows();
            phase = ExecPhase::Streaming;
        }

        phase = ExecPhase::Complete;
        debug_assert_eq!(phase, ExecPhase::Complete);

        // completion metadata for the consumer
        let info = last_info.unwrap_or_default();
        let affected = if stmt.is_query() { 0 } else { info.row_count };
        let _ = affected_tx.send(affected);
        let _ = counts_tx.send(batch_row_counts(&info, num_iters));
        let _ = out_binds_tx.send(out_binds.unwrap_or_default());
        drop(row_tx);

        // the statement is disposed with the task; its cursor rides the next
        // outbound call
        self.cleanup.add_cursor(stmt.cursor_id);
        Ok(())
    }

    /// Wait for a complete logical reply while watching for cancellation.
    async fn read_task_reply(
        &mut self,
        cancel_rx: &mut watch::Receiver<bool>,
    ) -> Result<TaskReply> {
        if *cancel_rx.borrow() {
            self.cancel_server_call().await?;
            return Ok(TaskReply::Cancelled);
        }

        let mut assembler = ReplyAssembler::new();
        loop {
            let packet = tokio::select! {
                biased;
                changed = cancel_rx.changed() => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        self.cancel_server_call().await?;
                        return Ok(TaskReply::Cancelled);
                    }
                    continue;
                }
                packet = self.stream.read_packet() => packet?,
            };

            match packet.packet_type {
                TNS_PACKET_TYPE_DATA => match assembler.push(&packet)? {
                    ReplyEvent::Complete(reply) => return Ok(TaskReply::Reply(reply)),
                    ReplyEvent::Incomplete => {}
                    ReplyEvent::ServerEof => return Err(Error::UncleanShutdown),
                },
                TNS_PACKET_TYPE_MARKER => {
                    return Err(
                        crate::protocol::handshake::recover_from_marker(
                            &mut self.stream,
                            &mut self.caps,
                        )
                        .await,
                    );
                }
                TNS_PACKET_TYPE_CONTROL => handle_control_packet(&packet, &mut self.caps),
                other => {
                    return Err(Error::UnexpectedPacketType {
                        expected: TNS_PACKET_TYPE_DATA,
                        actual: other,
                    });
                }
            }
        }
    }

    /// Interrupt the in-flight server call: BREAK then RESET, then drop
    /// inbound packets until the server acknowledges the reset.
    async fn cancel_server_call(&mut self) -> Result<()> {
        if self.marker.request_break() {
            let break_marker = MarkerMessage::break_();
            self.stream
                .send_message(TNS_PACKET_TYPE_MARKER, &break_marker)
                .await?;
        }
        let reset = MarkerMessage::reset();
        self.stream
            .send_message(TNS_PACKET_TYPE_MARKER, &reset)
            .await?;
        log::debug!("cancellation markers sent, draining until reset ack");

        let mut saw_reset = false;
        let mut assembler = ReplyAssembler::new();
        for _ in 0..256 {
            let packet = self.stream.read_packet().await?;
            match packet.packet_type {
                TNS_PACKET_TYPE_MARKER => {
                    if packet.marker_type() == Some(TNS_MARKER_TYPE_RESET) {
                        saw_reset = true;
                        self.marker.acknowledged();
                    }
                }
                TNS_PACKET_TYPE_DATA => {
                    // the post-reset reply (typically ORA-01013) ends the
                    // exchange; pre-reset data is discarded
                    match assembler.push(&packet)? {
                        ReplyEvent::Complete(_) if saw_reset => return Ok(()),
                        ReplyEvent::Complete(_) => {}
                        ReplyEvent::Incomplete => {}
                        ReplyEvent::ServerEof => return Err(Error::UncleanShutdown),
                    }
                }
                TNS_PACKET_TYPE_CONTROL => handle_control_packet(&packet, &mut self.caps),
                other => {
                    return Err(Error::UnexpectedPacketType {
                        expected: TNS_PACKET_TYPE_MARKER,
                        actual: other,
                    });
                }
            }
        }
        Err(Error::connection("reset marker never acknowledged"))
    }

    /// Orderly logoff: flush remaining cleanup, release any DRCP session,
    /// LOGOFF, then close the socket.
    async fn graceful_close(&mut self) -> Result<()> {
        self.state = ConnectionState::ReadyToLogOff;

        let cursors = self.cleanup.take_cursors();
        let lobs = self.cleanup.take_temp_lobs();

        let close_piggyback;
        let lob_piggyback;
        let release_piggyback;
        let mut parts: Vec<&dyn Message> = Vec::with_capacity(4);
        if !cursors.is_empty() {
            close_piggyback = CloseCursorsPiggyback {
                cursor_ids: &cursors,
                ttc_field_version: self.caps.ttc_field_version,
            };
            parts.push(&close_piggyback);
        }
        if !lobs.is_empty() {
            lob_piggyback = FreeTempLobsPiggyback {
                locators: &lobs,
                ttc_field_version: self.caps.ttc_field_version,
            };
            parts.push(&lob_piggyback);
        }
        if self.use_pooled_server {
            release_piggyback = SessionReleasePiggyback {
                ttc_field_version: self.caps.ttc_field_version,
            };
            parts.push(&release_piggyback);
        }
        let logoff = SimpleFunctionMessage::logoff(self.caps.ttc_field_version);
        parts.push(&logoff);

        self.state = ConnectionState::LoggingOff;
        let result = async {
            self.stream.send_composite(&parts).await?;
            // some servers drop the link instead of acknowledging logoff
            if read_reply(&mut self.stream, &mut self.caps).await.is_err() {
                log::debug!("no logoff acknowledgement from server");
            }
            Ok::<_, Error>(())
        }
        .await;

        self.state = ConnectionState::Closing;
        let shutdown = self.stream.shutdown().await;
        self.state = ConnectionState::Closed;
        log::debug!("connection closed");

        result.and(shutdown)
    }
}

/// Row counts for batch DML: uniform success except for rows carried in the
/// batch-error list.
fn batch_row_counts(info: &ErrorInfo, num_iters: u32) -> Vec<u64> {
    if num_iters <= 1 {
        return Vec::new();
    }
    let mut counts = vec![1u64; num_iters as usize];
    for batch_error in &info.batch_errors {
        if let Some(slot) = counts.get_mut(batch_error.row_offset as usize) {
            *slot = 0;
        }
    }
    counts
}

fn fail_task(task: Task, make_error: impl Fn() -> Error) {
    match task {
        Task::Query(query) => {
            let _ = query.results_tx.send(Err(make_error()));
        }
        Task::Ping(tx) | Task::Commit(tx) | Task::Rollback(tx) | Task::Close(tx) => {
            let _ = tx.send(Err(make_error()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BatchError;
    use crate::protocol::message::write_packet_header;
    use crate::protocol::packet::Transport;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

    fn duplex_dispatcher(
        capacity: usize,
    ) -> (Dispatcher, mpsc::Sender<Task>, DuplexStream) {
        let (client, server) = tokio::io::duplex(64 * 1024);
        let (task_tx, task_rx) = mpsc::channel(capacity);
        let stream = PacketStream::from_transport(Transport::Secure(Box::new(client)));
        let dispatcher = Dispatcher::new(stream, Capabilities::new(), task_rx, false);
        (dispatcher, task_tx, server)
    }

    fn marker_frame(subtype: u8) -> Vec<u8> {
        let mut buf = Vec::new();
        write_packet_header(
            &mut buf,
            TNS_PACKET_TYPE_MARKER,
            0,
            PACKET_HEADER_SIZE + 3,
            false,
        );
        buf.extend_from_slice(&[1, 0, subtype]);
        buf
    }

    fn data_frame(body: &[u8], flags: u16) -> Vec<u8> {
        let mut buf = Vec::new();
        write_packet_header(
            &mut buf,
            TNS_PACKET_TYPE_DATA,
            0,
            PACKET_HEADER_SIZE + 2 + body.len(),
            false,
        );
        buf.extend_from_slice(&flags.to_be_bytes());
        buf.extend_from_slice(body);
        buf
    }

    async fn read_frame(server: &mut DuplexStream) -> Vec<u8> {
        let mut header = [0u8; PACKET_HEADER_SIZE];
        server.read_exact(&mut header).await.unwrap();
        let total = u16::from_be_bytes([header[0], header[1]]) as usize;
        let mut rest = vec![0u8; total - PACKET_HEADER_SIZE];
        server.read_exact(&mut rest).await.unwrap();
        let mut frame = header.to_vec();
        frame.extend_from_slice(&rest);
        frame
    }

    fn query_task() -> (Task, oneshot::Receiver<Result<QueryResults>>) {
        let (results_tx, results_rx) = oneshot::channel();
        let (cancel, cancel_rx) = CancelHandle::new();
        let task = Task::Query(Box::new(QueryTask {
            statement: Statement::parse("SELECT 1 FROM DUAL").unwrap(),
            options: QueryOptions::default(),
            results_tx,
            cancel,
            cancel_rx,
        }));
        (task, results_rx)
    }

    #[test]
    fn test_single_outstanding_break() {
        let mut marker = MarkerDiscipline::default();
        // two consecutive requests produce exactly one wire BREAK
        assert!(marker.request_break());
        assert!(!marker.request_break());
        assert!(!marker.request_break());
        assert!(marker.is_outstanding());

        marker.acknowledged();
        assert!(!marker.is_outstanding());
        assert!(marker.request_break());
    }

    #[tokio::test]
    async fn test_cancel_server_call_marker_exchange() {
        let (mut dispatcher, _task_tx, mut server) = duplex_dispatcher(4);

        let server_task = tokio::spawn(async move {
            // exactly one BREAK, then the RESET
            let break_frame = read_frame(&mut server).await;
            assert_eq!(break_frame[4], TNS_PACKET_TYPE_MARKER);
            assert_eq!(break_frame[10], TNS_MARKER_TYPE_BREAK);
            let reset_frame = read_frame(&mut server).await;
            assert_eq!(reset_frame[4], TNS_PACKET_TYPE_MARKER);
            assert_eq!(reset_frame[10], TNS_MARKER_TYPE_RESET);

            // a stray pre-reset marker must be skipped by the drain
            server
                .write_all(&marker_frame(TNS_MARKER_TYPE_BREAK))
                .await
                .unwrap();
            server
                .write_all(&marker_frame(TNS_MARKER_TYPE_RESET))
                .await
                .unwrap();
            // post-reset reply ends the exchange
            server
                .write_all(&data_frame(&[0xff], TNS_DATA_FLAGS_END_OF_REQUEST))
                .await
                .unwrap();
        });

        dispatcher.cancel_server_call().await.unwrap();
        assert!(!dispatcher.marker.is_outstanding());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_drain_gives_up_without_reset_ack() {
        let (mut dispatcher, _task_tx, mut server) = duplex_dispatcher(4);

        let server_task = tokio::spawn(async move {
            let _break_frame = read_frame(&mut server).await;
            let _reset_frame = read_frame(&mut server).await;
            // flood the drain with unacknowledged markers
            for _ in 0..256 {
                server
                    .write_all(&marker_frame(TNS_MARKER_TYPE_BREAK))
                    .await
                    .unwrap();
            }
        });

        let err = dispatcher.cancel_server_call().await.unwrap_err();
        assert!(matches!(err, Error::Connection { .. }));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancel_drain_reports_server_eof() {
        let (mut dispatcher, _task_tx, mut server) = duplex_dispatcher(4);

        let server_task = tokio::spawn(async move {
            let _break_frame = read_frame(&mut server).await;
            let _reset_frame = read_frame(&mut server).await;
            server
                .write_all(&data_frame(&[], TNS_DATA_FLAGS_EOF))
                .await
                .unwrap();
        });

        let err = dispatcher.cancel_server_call().await.unwrap_err();
        assert!(matches!(err, Error::UncleanShutdown));
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_teardown_fails_all_queued_tasks() {
        let (mut dispatcher, task_tx, _server) = duplex_dispatcher(8);

        let (ping_tx, ping_rx) = oneshot::channel();
        task_tx.send(Task::Ping(ping_tx)).await.unwrap();
        let (commit_tx, commit_rx) = oneshot::channel();
        task_tx.send(Task::Commit(commit_tx)).await.unwrap();
        let (query, query_rx) = query_task();
        task_tx.send(query).await.unwrap();

        dispatcher.teardown().await;
        assert_eq!(dispatcher.state, ConnectionState::Closed);

        assert!(matches!(
            ping_rx.await.unwrap(),
            Err(Error::UncleanShutdown)
        ));
        assert!(matches!(
            commit_rx.await.unwrap(),
            Err(Error::UncleanShutdown)
        ));
        assert!(matches!(
            query_rx.await.unwrap(),
            Err(Error::UncleanShutdown)
        ));
    }

    #[test]
    fn test_batch_row_counts() {
        let info = ErrorInfo {
            batch_errors: vec![
                BatchError {
                    row_offset: 1,
                    number: 1,
                },
                BatchError {
                    row_offset: 3,
                    number: 1400,
                },
            ],
            ..ErrorInfo::default()
        };
        assert_eq!(batch_row_counts(&info, 5), vec![1, 0, 1, 0, 1]);
        assert!(batch_row_counts(&info, 1).is_empty());
    }
}
