//! Streaming export encoders. Both walk the full result set batch by batch
//! through the query engine; a bounded channel provides backpressure, and a
//! closed client connection tears the walk down, aborting the downstream
//! fetch currently in flight.

use crate::{
    error::Result,
    parser::{Aggregate, QueryPlan},
    query::QueryEngine,
};
use axum::body::Body;
use bytes::Bytes;
use serde_json::Value;
use std::convert::Infallible;
use tokio::sync::mpsc::{self, Sender};
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

type Chunk = std::result::Result<Bytes, Infallible>;

pub fn csv_stream(
    engine: QueryEngine,
    table: String,
    plan: QueryPlan,
    batch: u64,
    fallback_header: Vec<String>,
) -> Body {
    let (tx, rx) = mpsc::channel::<Chunk>(2);
    tokio::spawn(async move {
        if let Err(err) = pump_csv(&engine, &table, &plan, batch, fallback_header, &tx).await {
            // the status line is long gone; all we can do is stop the stream
            warn!(error = %err, %table, "csv export aborted");
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

pub fn json_array_stream(engine: QueryEngine, table: String, plan: QueryPlan, batch: u64) -> Body {
    let (tx, rx) = mpsc::channel::<Chunk>(2);
    tokio::spawn(async move {
        if let Err(err) = pump_json(&engine, &table, &plan, batch, &tx).await {
            warn!(error = %err, %table, "json export aborted");
        }
    });
    Body::from_stream(ReceiverStream::new(rx))
}

async fn pump_csv(
    engine: &QueryEngine,
    table: &str,
    plan: &QueryPlan,
    batch: u64,
    fallback_header: Vec<String>,
    tx: &Sender<Chunk>,
) -> Result<()> {
    let mut offset = 0u64;
    let mut header = explicit_header(plan);

    loop {
        // dropping the fetch future on disconnect aborts the outbound request
        let rows = tokio::select! {
            rows = engine.fetch_window(table, plan, offset, batch) => rows?,
            () = tx.closed() => return Ok(()),
        };
        let header = header.get_or_insert_with(|| derive_header(&rows, fallback_header.clone()));

        let mut chunk = Vec::new();
        {
            let mut writer = csv::Writer::from_writer(&mut chunk);
            if offset == 0 {
                write_record(&mut writer, header.iter().map(String::as_str))?;
            }
            for row in &rows {
                write_record(&mut writer, header.iter().map(|column| csv_field(row.get(column))))?;
            }
            writer.flush().map_err(anyhow::Error::from)?;
        }

        if tx.send(Ok(chunk.into())).await.is_err() {
            // client closed the connection
            return Ok(());
        }
        if (rows.len() as u64) < batch {
            return Ok(());
        }
        offset += batch;
    }
}

async fn pump_json(
    engine: &QueryEngine,
    table: &str,
    plan: &QueryPlan,
    batch: u64,
    tx: &Sender<Chunk>,
) -> Result<()> {
    let mut offset = 0u64;
    let mut first = true;

    loop {
        let rows = tokio::select! {
            rows = engine.fetch_window(table, plan, offset, batch) => rows?,
            () = tx.closed() => return Ok(()),
        };

        let mut chunk = String::new();
        if offset == 0 {
            chunk.push('[');
        }
        for row in &rows {
            if !first {
                chunk.push(',');
            }
            first = false;
            chunk.push_str(&serde_json::to_string(row).map_err(anyhow::Error::from)?);
        }
        let done = (rows.len() as u64) < batch;
        if done {
            chunk.push(']');
        }

        if tx.send(Ok(chunk.into())).await.is_err() {
            return Ok(());
        }
        if done {
            return Ok(());
        }
        offset += batch;
    }
}

fn write_record<W, I, S>(writer: &mut csv::Writer<W>, record: I) -> Result<()>
where
    W: std::io::Write,
    I: IntoIterator<Item = S>,
    S: AsRef<[u8]>,
{
    writer.write_record(record).map_err(anyhow::Error::from)?;
    Ok(())
}

/// Header known before the first fetch: the explicit projection, or the
/// aggregation output columns.
fn explicit_header(plan: &QueryPlan) -> Option<Vec<String>> {
    if let Some(aggregation) = &plan.aggregation {
        let mut header = aggregation.group_by.clone();
        header.extend(aggregation.aggregates.iter().map(Aggregate::alias));
        return Some(header);
    }
    plan.projection.clone()
}

/// Otherwise the first page's keys decide, falling back to the profile order
/// when the result set is empty.
fn derive_header(rows: &[Value], fallback: Vec<String>) -> Vec<String> {
    rows.first()
        .and_then(Value::as_object)
        .map(|row| row.keys().cloned().collect())
        .unwrap_or(fallback)
}

fn csv_field(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(Value::Bool(flag)) => flag.to_string(),
        Some(Value::Number(number)) => number.to_string(),
        Some(other) => other.to_string(),
    }
}
