//! Thin grouping around client-heartbeat persistence, mirroring the
//! grouping the other `MetricsWriter` methods already have around their
//! respective tables.

use crate::writer::MetricsWriter;

pub struct ClientRegistry<'a> {
    writer: &'a MetricsWriter,
}

impl<'a> ClientRegistry<'a> {
    pub fn new(writer: &'a MetricsWriter) -> Self {
        ClientRegistry { writer }
    }

    pub async fn heartbeat(&self, client_id: &str, status: &str) {
        self.writer.update_client_heartbeat(client_id, status).await;
    }
}
