//! Synchronous PostgreSQL connection.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::sync::Arc;

use crate::buffer_set::BufferSet;
use crate::error::{Error, ErrorFields, Result};
use crate::handler::{CollectHandler, DropHandler, FirstRowHandler, ResponseHandler};
use crate::opts::Opts;
use crate::protocol::Framed;
use crate::protocol::backend::BackendKeyData;
use crate::protocol::frontend::write_terminate;
use crate::protocol::types::{Oid, TransactionStatus};
use crate::row::FromRow;
use crate::state::extended::ResultField;
use crate::state::{
    Action, AsyncMessage, ConnectionStateMachine, ExtendedQueryStateMachine, RequestQueue,
    SimpleQueryStateMachine, StateMachine, async_message,
};
use crate::statement::{IntoStatement, PreparedStatement};
use crate::types::{
    BuiltinCodecs, CodecContext, CodecLookup, TypeCache, Value, encode_params, result_formats,
};

use super::cancel::CancelToken;
use super::portal::Portal;
use super::stream::Stream;
use super::transaction::Transaction;

/// A LISTEN/NOTIFY notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    /// Process ID of the notifying backend
    pub process_id: u32,
    pub channel: String,
    pub payload: String,
}

type NoticeCallback = Box<dyn FnMut(&ErrorFields) + Send>;

/// Synchronous PostgreSQL connection over any byte stream.
///
/// One request runs at a time: each method writes its messages, then reads
/// until the final ReadyForQuery. Notices and notifications that arrive in
/// between are handled on the way.
pub struct Conn<S: Read + Write = Stream> {
    framed: Framed<S>,
    buffer_set: BufferSet,
    backend_key: Option<BackendKeyData>,
    server_params: Vec<(String, String)>,
    transaction_status: TransactionStatus,
    is_broken: bool,
    types: Arc<TypeCache>,
    codecs: Arc<dyn CodecLookup>,
    codec_context: CodecContext,
    notice_callback: Option<NoticeCallback>,
    notifications: VecDeque<Notification>,
    portal_counter: u64,
}

impl<S: Read + Write> std::fmt::Debug for Conn<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Conn")
            .field("connection_id", &self.connection_id())
            .field("transaction_status", &self.transaction_status)
            .field("is_broken", &self.is_broken)
            .finish_non_exhaustive()
    }
}

impl Conn<Stream> {
    /// Connect to a PostgreSQL server.
    pub fn new<O: TryInto<Opts>>(opts: O) -> Result<Self>
    where
        Error: From<O::Error>,
    {
        let opts = opts.try_into()?;
        let stream = Stream::connect(&opts)?;
        Self::new_with_stream(stream, opts)
    }
}

impl<S: Read + Write> Conn<S> {
    /// Run startup and authentication over an already open stream.
    pub fn new_with_stream(stream: S, options: Opts) -> Result<Self> {
        let mut conn = Self {
            framed: Framed::new(stream),
            buffer_set: BufferSet::new(),
            backend_key: None,
            server_params: Vec::new(),
            transaction_status: TransactionStatus::Idle,
            is_broken: false,
            types: Arc::new(TypeCache::default()),
            codecs: Arc::new(BuiltinCodecs),
            codec_context: CodecContext::default(),
            notice_callback: None,
            notifications: VecDeque::new(),
            portal_counter: 0,
        };

        let mut state_machine = ConnectionStateMachine::new(options);
        let action = state_machine.start(&mut conn.buffer_set);
        if let Err(e) = conn.drive(&mut state_machine, action) {
            conn.is_broken = true;
            return Err(e);
        }

        conn.backend_key = state_machine.backend_key().copied();
        conn.server_params = state_machine.server_params().to_vec();
        conn.transaction_status = state_machine.transaction_status();
        tracing::debug!(process_id = conn.connection_id(), "connection ready");
        Ok(conn)
    }

    /// Get the backend key data for query cancellation.
    pub fn backend_key(&self) -> Option<&BackendKeyData> {
        self.backend_key.as_ref()
    }

    /// Get the connection ID (backend process ID).
    ///
    /// Returns 0 if the backend key data is not available.
    pub fn connection_id(&self) -> u32 {
        self.backend_key.as_ref().map_or(0, |k| k.process_id())
    }

    /// Token for cancelling queries on this connection from elsewhere.
    pub fn cancel_token(&self) -> Option<CancelToken> {
        self.backend_key
            .as_ref()
            .map(|k| CancelToken::new(k.process_id(), k.secret()))
    }

    /// Get server parameters.
    pub fn server_params(&self) -> &[(String, String)] {
        &self.server_params
    }

    /// Look up one server parameter, e.g. `server_version`.
    pub fn server_param(&self, name: &str) -> Option<&str> {
        self.server_params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// Get the current transaction status.
    pub fn transaction_status(&self) -> TransactionStatus {
        self.transaction_status
    }

    /// Check if currently in a transaction.
    pub fn in_transaction(&self) -> bool {
        self.transaction_status.in_transaction()
    }

    /// Check if the connection is broken.
    pub fn is_broken(&self) -> bool {
        self.is_broken
    }

    /// Type cache used to resolve column and parameter types.
    pub fn types(&self) -> &Arc<TypeCache> {
        &self.types
    }

    /// Share a type cache, e.g. between connections to the same server.
    pub fn set_type_cache(&mut self, types: Arc<TypeCache>) {
        self.types = types;
    }

    pub fn set_codecs(&mut self, codecs: Arc<dyn CodecLookup>) {
        self.codecs = codecs;
    }

    pub fn set_codec_context(&mut self, ctx: CodecContext) {
        self.codec_context = ctx;
    }

    /// Receive NoticeResponse fields instead of logging them.
    pub fn set_notice_callback<F: FnMut(&ErrorFields) + Send + 'static>(&mut self, callback: F) {
        self.notice_callback = Some(Box::new(callback));
    }

    /// Notifications received so far, oldest first.
    pub fn take_notifications(&mut self) -> Vec<Notification> {
        self.notifications.drain(..).collect()
    }

    /// Block until a notification arrives.
    pub fn wait_notification(&mut self) -> Result<Notification> {
        self.ensure_usable()?;
        let result = self.wait_notification_inner();
        self.track(result)
    }

    fn wait_notification_inner(&mut self) -> Result<Notification> {
        loop {
            if let Some(notification) = self.notifications.pop_front() {
                return Ok(notification);
            }
            let tag = self.framed.read_message_into(&mut self.buffer_set)?;
            if !tag.is_async() {
                return Err(Error::Protocol(format!("unexpected {tag} while idle")));
            }
            let msg = async_message(self.buffer_set.message()?)?;
            self.handle_async(msg);
        }
    }

    fn ensure_usable(&self) -> Result<()> {
        if self.is_broken {
            return Err(Error::ConnectionBroken);
        }
        Ok(())
    }

    fn track<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result
            && e.is_connection_broken()
        {
            tracing::warn!(error = %e, "connection broken");
            self.is_broken = true;
        }
        result
    }

    fn handle_async(&mut self, msg: AsyncMessage) {
        match msg {
            AsyncMessage::Notice(fields) => {
                if let Some(callback) = self.notice_callback.as_mut() {
                    callback(&fields);
                } else if matches!(fields.severity(), Some("WARNING")) {
                    tracing::warn!(code = ?fields.code, "{}", fields);
                } else {
                    tracing::info!(code = ?fields.code, "{}", fields);
                }
            }
            AsyncMessage::Notification {
                pid,
                channel,
                payload,
            } => {
                tracing::debug!(pid, channel = %channel, "notification");
                self.notifications.push_back(Notification {
                    process_id: pid,
                    channel,
                    payload,
                });
            }
            AsyncMessage::ParameterChanged { name, value } => {
                if let Some(entry) = self.server_params.iter_mut().find(|(n, _)| *n == name) {
                    entry.1 = value;
                } else {
                    self.server_params.push((name, value));
                }
            }
        }
    }

    /// Send and receive until the state machine finishes.
    fn drive<M: StateMachine>(&mut self, machine: &mut M, mut action: Action) -> Result<()> {
        loop {
            match action {
                Action::WriteAndReadMessage => {
                    let sent = self.framed.send(&self.buffer_set.write_buffer);
                    self.buffer_set.write_buffer.clear();
                    sent?;
                }
                Action::ReadMessage => {}
                Action::HandleAsyncMessageAndReadMessage(msg) => self.handle_async(msg),
                Action::Finished => return Ok(()),
            }
            self.framed.read_message_into(&mut self.buffer_set)?;
            action = machine.step(&mut self.buffer_set)?;
        }
    }

    fn run_extended<H: ResponseHandler>(
        &mut self,
        machine: &mut ExtendedQueryStateMachine<'_, H>,
    ) -> Result<()> {
        self.buffer_set.write_buffer.clear();
        let action = machine.start(&mut self.buffer_set)?;
        let result = self.drive(machine, action);
        if machine.is_complete() {
            self.transaction_status = machine.transaction_status();
        }
        result
    }

    // === Simple Query Protocol ===

    /// Run statements with the simple query protocol.
    ///
    /// Meant for transaction control and session setup; results are text.
    pub fn query<H: ResponseHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        self.ensure_usable()?;
        let result = self.query_inner(sql, handler);
        self.track(result)
    }

    fn query_inner<H: ResponseHandler>(&mut self, sql: &str, handler: &mut H) -> Result<()> {
        let types = Arc::clone(&self.types);
        let mut state_machine = SimpleQueryStateMachine::new(handler, &types);
        self.buffer_set.write_buffer.clear();
        let action = state_machine.start(&mut self.buffer_set, sql);
        let result = self.drive(&mut state_machine, action);
        if state_machine.is_complete() {
            self.transaction_status = state_machine.transaction_status();
        }
        result
    }

    /// Run a simple query and discard results.
    pub fn query_drop(&mut self, sql: &str) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.query(sql, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Run a simple query and collect typed rows.
    pub fn query_collect<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Run a simple query and return the first typed row.
    pub fn query_first<T: for<'a> FromRow<'a>>(&mut self, sql: &str) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.query(sql, &mut handler)?;
        Ok(handler.into_row())
    }

    // === Extended Query Protocol ===

    /// Prepare a statement, letting the server infer parameter types.
    pub fn prepare(&mut self, name: &str, query: &str) -> Result<PreparedStatement> {
        self.prepare_typed(name, query, &[])
    }

    /// Prepare a statement with explicit parameter types (0 = infer).
    pub fn prepare_typed(
        &mut self,
        name: &str,
        query: &str,
        param_oids: &[Oid],
    ) -> Result<PreparedStatement> {
        self.ensure_usable()?;
        let result = self.prepare_inner(name, query, param_oids);
        self.track(result)
    }

    fn prepare_inner(
        &mut self,
        name: &str,
        query: &str,
        param_oids: &[Oid],
    ) -> Result<PreparedStatement> {
        let mut queue = RequestQueue::new();
        queue
            .parse(name, query, param_oids)
            .describe_statement(name)
            .sync();

        let types = Arc::clone(&self.types);
        let mut handler = DropHandler::new();
        let mut state_machine = ExtendedQueryStateMachine::new(queue, &mut handler, &types);
        self.run_extended(&mut state_machine)?;

        let param_types = state_machine
            .take_param_oids()
            .into_iter()
            .map(|oid| types.get(oid))
            .collect();
        Ok(PreparedStatement {
            name: name.to_string(),
            param_types,
            columns: state_machine.take_columns(),
        })
    }

    /// Execute a statement with a handler.
    ///
    /// Raw SQL is prepared as the unnamed statement first.
    pub fn exec<St: IntoStatement, H: ResponseHandler>(
        &mut self,
        statement: St,
        params: &[Value],
        handler: &mut H,
    ) -> Result<()> {
        let prepared;
        let statement = match (statement.as_prepared(), statement.as_sql()) {
            (Some(stmt), _) => stmt,
            (None, Some(sql)) => {
                prepared = self.prepare("", sql)?;
                &prepared
            }
            (None, None) => return Err(Error::InvalidUsage("empty statement reference".into())),
        };
        self.ensure_usable()?;
        let result = self.bind_and_execute(statement, "", params, 0, handler);
        self.track(result).map(|_| ())
    }

    /// Queue Bind/Describe/Execute/Sync for `statement` on `portal`.
    ///
    /// Returns the portal's columns and whether Execute stopped at the row limit.
    fn bind_and_execute<H: ResponseHandler>(
        &mut self,
        statement: &PreparedStatement,
        portal: &str,
        params: &[Value],
        max_rows: u32,
        handler: &mut H,
    ) -> Result<(Vec<ResultField>, bool)> {
        let mut queue = self.bind_queue(statement, portal, params)?;
        queue.describe_portal(portal).execute(portal, max_rows).sync();

        let types = Arc::clone(&self.types);
        let mut state_machine = ExtendedQueryStateMachine::new(queue, handler, &types);
        self.run_extended(&mut state_machine)?;
        let suspended = state_machine.portal_suspended();
        Ok((state_machine.take_columns(), suspended))
    }

    fn bind_queue(
        &self,
        statement: &PreparedStatement,
        portal: &str,
        params: &[Value],
    ) -> Result<RequestQueue> {
        let encoded = encode_params(
            &statement.param_types,
            params,
            &self.types,
            self.codecs.as_ref(),
            &self.codec_context,
        )?;
        let formats = result_formats(
            statement.columns.iter().map(|c| &c.type_ref),
            &self.types,
            self.codecs.as_ref(),
        );
        let mut queue = RequestQueue::new();
        queue.bind(
            portal,
            &statement.name,
            encoded.formats(),
            &encoded.values(),
            &formats,
        );
        Ok(queue)
    }

    /// Execute a statement and discard results.
    pub fn exec_drop<St: IntoStatement>(
        &mut self,
        statement: St,
        params: &[Value],
    ) -> Result<Option<u64>> {
        let mut handler = DropHandler::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.rows_affected())
    }

    /// Execute a statement and collect typed rows.
    ///
    /// ```ignore
    /// let stmt = conn.prepare("by_id", "SELECT id, name FROM users WHERE id = $1")?;
    /// let rows: Vec<(i32, String)> = conn.exec_collect(&stmt, &[Value::Int4(42)])?;
    /// ```
    pub fn exec_collect<T: for<'a> FromRow<'a>, St: IntoStatement>(
        &mut self,
        statement: St,
        params: &[Value],
    ) -> Result<Vec<T>> {
        let mut handler = CollectHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_rows())
    }

    /// Execute a statement and return the first typed row.
    pub fn exec_first<T: for<'a> FromRow<'a>, St: IntoStatement>(
        &mut self,
        statement: St,
        params: &[Value],
    ) -> Result<Option<T>> {
        let mut handler = FirstRowHandler::<T>::new();
        self.exec(statement, params, &mut handler)?;
        Ok(handler.into_row())
    }

    /// Bind `statement` to a new named portal without executing it.
    ///
    /// Portals live until the end of the transaction, so one must be open.
    pub fn exec_portal(&mut self, statement: &PreparedStatement, params: &[Value]) -> Result<Portal> {
        self.ensure_usable()?;
        if !self.in_transaction() {
            return Err(Error::InvalidUsage(
                "named portals require an open transaction".into(),
            ));
        }
        self.portal_counter += 1;
        let name = format!("pgcore_portal_{}", self.portal_counter);
        let result = self.bind_portal(statement, &name, params);
        let columns = self.track(result)?;
        Ok(Portal::new(name, columns))
    }

    fn bind_portal(
        &mut self,
        statement: &PreparedStatement,
        portal: &str,
        params: &[Value],
    ) -> Result<Vec<ResultField>> {
        let mut queue = self.bind_queue(statement, portal, params)?;
        queue.describe_portal(portal).sync();

        let types = Arc::clone(&self.types);
        let mut handler = DropHandler::new();
        let mut state_machine = ExtendedQueryStateMachine::new(queue, &mut handler, &types);
        self.run_extended(&mut state_machine)?;
        Ok(state_machine.take_columns())
    }

    /// Execute an open portal again. Returns true if it was suspended.
    pub(crate) fn execute_portal<H: ResponseHandler>(
        &mut self,
        portal: &str,
        columns: &[ResultField],
        max_rows: u32,
        handler: &mut H,
    ) -> Result<bool> {
        self.ensure_usable()?;
        let mut queue = RequestQueue::new();
        queue.execute(portal, max_rows).sync();

        let types = Arc::clone(&self.types);
        let mut state_machine =
            ExtendedQueryStateMachine::new(queue, handler, &types).with_columns(columns.to_vec());
        let result = self.run_extended(&mut state_machine);
        let suspended = state_machine.portal_suspended();
        self.track(result).map(|()| suspended)
    }

    /// Run an arbitrary queue of extended-protocol requests in one round trip.
    ///
    /// Every response is reported to `handler` in order. If a statement
    /// fails, the backend skips to the next Sync; the first error is
    /// returned after all responses are read.
    pub fn pipeline<H: ResponseHandler>(
        &mut self,
        queue: RequestQueue,
        handler: &mut H,
    ) -> Result<()> {
        self.ensure_usable()?;
        let types = Arc::clone(&self.types);
        let mut state_machine = ExtendedQueryStateMachine::new(queue, handler, &types);
        let result = self.run_extended(&mut state_machine);
        self.track(result)
    }

    /// Close a prepared statement.
    pub fn close_statement(&mut self, statement: &PreparedStatement) -> Result<()> {
        let mut queue = RequestQueue::new();
        queue.close_statement(&statement.name).sync();
        self.pipeline(queue, &mut DropHandler::new())
    }

    pub(crate) fn close_portal(&mut self, portal: &str) -> Result<()> {
        let mut queue = RequestQueue::new();
        queue.close_portal(portal).sync();
        self.pipeline(queue, &mut DropHandler::new())
    }

    // === Transactions ===

    /// Send BEGIN.
    pub fn begin(&mut self) -> Result<Transaction> {
        if self.in_transaction() {
            return Err(Error::InvalidUsage(
                "nested transactions are not supported".into(),
            ));
        }
        self.query_drop("BEGIN")?;
        Ok(Transaction::new(self.connection_id()))
    }

    /// Run a closure within a transaction.
    ///
    /// If the closure neither commits nor rolls back, the transaction is
    /// rolled back. The closure's error wins over a rollback error.
    pub fn run_transaction<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Self, Transaction) -> Result<R>,
    {
        let tx = self.begin()?;
        let result = f(self, tx);

        if self.in_transaction() && !self.is_broken {
            let rollback_result = self.query_drop("ROLLBACK");
            let value = result?;
            rollback_result?;
            return Ok(value);
        }

        result
    }

    /// Send Terminate and close the connection.
    pub fn close(mut self) -> Result<()> {
        self.terminate()
    }

    fn terminate(&mut self) -> Result<()> {
        self.is_broken = true;
        let mut buf = Vec::with_capacity(5);
        write_terminate(&mut buf);
        self.framed.send(&buf)
    }
}

impl<S: Read + Write> Drop for Conn<S> {
    fn drop(&mut self) {
        if !self.is_broken {
            let _ = self.terminate();
        }
    }
}
