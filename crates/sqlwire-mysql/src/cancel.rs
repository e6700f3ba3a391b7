//! Out-of-band statement cancellation.

use sqlwire_core::Result;

use crate::config::MySqlConfig;
use crate::connection::MySqlConnection;

/// Cancels the statement running on another connection.
///
/// MySQL has no in-band cancel: the handle opens a second session with the
/// same credentials and sends `KILL QUERY <id>`. The victim's statement then
/// fails with error 1317 (query interrupted); its session stays open.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    config: MySqlConfig,
    connection_id: u32,
}

impl CancelHandle {
    pub(crate) fn new(mut config: MySqlConfig, connection_id: u32) -> Self {
        // the helper session needs no schema and must not create one
        config.database = None;
        config.create_database_if_not_exist = false;
        config.charset_name = None;
        Self {
            config,
            connection_id,
        }
    }

    /// Thread id of the connection this handle cancels.
    pub fn connection_id(&self) -> u32 {
        self.connection_id
    }

    pub fn kill_query_sql(&self) -> String {
        format!("KILL QUERY {}", self.connection_id)
    }

    /// Interrupt the target's running statement, if any.
    pub fn cancel(&self) -> Result<()> {
        tracing::debug!(target_id = self.connection_id, "cancelling running statement");
        let mut helper = MySqlConnection::connect(self.config.clone())?;
        let result = helper.execute(&self.kill_query_sql(), &[]).map(drop);
        if let Err(e) = helper.close() {
            tracing::debug!(error = %e, "error closing cancel session");
        }
        result
    }
}
