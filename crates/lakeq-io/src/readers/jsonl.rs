//! Streaming NDJSON reader producing batches of values.
//!
//! Each non-blank line is one JSON document. Strings holding RFC 3339
//! timestamps come back as time values. An optional filter drops rows as
//! they are read.

use std::fs::File;
use std::io::{BufRead, BufReader, Read};

use lakeq_core::batch::{Batch, Puller};
use lakeq_core::error::Result as CoreResult;
use lakeq_core::eval;
use lakeq_core::expr::Expr;
use lakeq_core::value::Value;

use crate::error::{Error, Result};

pub struct JsonlReader<R: Read> {
    reader: BufReader<R>,
    source: String,
    filter: Option<Expr>,
    batch_size: usize,
    line: usize,
    eof: bool,
}

impl JsonlReader<File> {
    pub fn from_path(path: &str) -> Result<Self> {
        let f = File::open(path)?;
        Ok(Self::from_reader(f, path))
    }
}

impl<R: Read> JsonlReader<R> {
    pub fn from_reader(reader: R, source: impl Into<String>) -> Self {
        Self {
            reader: BufReader::new(reader),
            source: source.into(),
            filter: None,
            batch_size: 500,
            line: 0,
            eof: false,
        }
    }

    pub fn with_filter(mut self, filter: Option<Expr>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn next_batch(&mut self) -> Result<Option<Vec<Value>>> {
        let mut rows = Vec::with_capacity(self.batch_size);
        while !self.eof && rows.len() < self.batch_size {
            let mut s = String::new();
            if self.reader.read_line(&mut s)? == 0 {
                self.eof = true;
                break;
            }
            self.line += 1;
            if s.trim().is_empty() {
                continue;
            }
            let doc: serde_json::Value = serde_json::from_str(&s)
                .map_err(|e| Error::Format(format!("line {}: {e}", self.line)))?;
            let v = Value::from_json(&doc);
            if let Some(f) = &self.filter {
                // Rows the filter cannot evaluate are dropped with it.
                if !eval::eval_bool(f, &v, &[]).unwrap_or(false) {
                    continue;
                }
            }
            rows.push(v);
        }
        if rows.is_empty() {
            return Ok(None);
        }
        Ok(Some(rows))
    }
}

impl<R: Read + Send> Puller for JsonlReader<R> {
    fn pull(&mut self, done: bool) -> CoreResult<Option<Batch>> {
        if done {
            self.eof = true;
            return Ok(None);
        }
        match self.next_batch() {
            Ok(rows) => Ok(rows.map(Batch::new)),
            Err(e) => Err(e.into_core(self.source.clone())),
        }
    }
}
