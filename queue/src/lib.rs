use log::{debug, warn};
use miette::Diagnostic;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use thiserror::Error;

#[derive(Debug, Error, Diagnostic)]
pub enum QueueError {
    #[error("error connecting to queue")]
    ConnectError(#[source] redis::RedisError),

    #[error("error executing queue pipeline")]
    PipelineError(#[source] redis::RedisError),

    #[error("error executing queue command")]
    CommandError(#[source] redis::RedisError),
}

/// A thin wrapper around a list-based Redis queue. Items are popped from
/// the tail (`RPOP`), mirroring a producer that `LPUSH`es new events onto
/// the head.
#[derive(Clone)]
pub struct Queue {
    conn: ConnectionManager,
    name: String,
}

impl Queue {
    pub async fn connect(redis_url: &str, queue_name: impl Into<String>) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url).map_err(QueueError::ConnectError)?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(QueueError::ConnectError)?;

        Ok(Self {
            conn,
            name: queue_name.into(),
        })
    }

    /// Pops up to `n` items from the tail of the queue in a single
    /// pipelined round-trip. Falls back to serial `RPOP`s if the pipeline
    /// itself fails (e.g. a mid-pipeline connection hiccup). Never blocks;
    /// returns fewer than `n` items (possibly zero) when the queue runs
    /// dry partway through.
    pub async fn pop_batch(&mut self, n: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        if n == 0 {
            return Ok(Vec::new());
        }

        match self.pop_batch_pipelined(n).await {
            Ok(items) => Ok(items),
            Err(err) => {
                warn!("queue pipeline failed, falling back to serial pops: {err}");
                self.pop_batch_serial(n).await
            }
        }
    }

    async fn pop_batch_pipelined(&mut self, n: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut pipe = redis::pipe();
        for _ in 0..n {
            pipe.rpop(&self.name, None);
        }

        let results: Vec<Option<Vec<u8>>> = pipe
            .query_async(&mut self.conn)
            .await
            .map_err(QueueError::PipelineError)?;

        // Results come back in pop order; stop at the first nil, since a
        // nil in the middle of the pipeline means the queue emptied out
        // while the pipeline was in flight and the remaining slots are
        // nils too.
        let items = results
            .into_iter()
            .take_while(Option::is_some)
            .flatten()
            .collect();

        Ok(items)
    }

    async fn pop_batch_serial(&mut self, n: usize) -> Result<Vec<Vec<u8>>, QueueError> {
        let mut items = Vec::with_capacity(n);
        for _ in 0..n {
            let item: Option<Vec<u8>> = self
                .conn
                .rpop(&self.name, None)
                .await
                .map_err(QueueError::CommandError)?;

            match item {
                Some(item) => items.push(item),
                None => break,
            }
        }

        debug!("serial pop collected {} items", items.len());
        Ok(items)
    }

    pub async fn queue_length(&mut self) -> Result<usize, QueueError> {
        let len: usize = self
            .conn
            .llen(&self.name)
            .await
            .map_err(QueueError::CommandError)?;

        Ok(len)
    }
}

#[cfg(test)]
mod tests {
    #[test]
    fn take_while_stops_at_first_nil() {
        let results: Vec<Option<Vec<u8>>> = vec![
            Some(b"a".to_vec()),
            Some(b"b".to_vec()),
            None,
            Some(b"c".to_vec()),
        ];

        let items: Vec<Vec<u8>> = results.into_iter().take_while(Option::is_some).flatten().collect();

        assert_eq!(items, vec![b"a".to_vec(), b"b".to_vec()]);
    }
}
