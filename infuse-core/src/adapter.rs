//! Bridge between task output and the data-logger fabric.
//!
//! A schedule row carries `{loggers, tdf_mask}` sink descriptors; the
//! emitter walks them and forwards a record to every logger set whose mask
//! selects the TDF the task is emitting.

use crate::schedule::TdfSink;
use infuse_proto::{EpochTime, TdfId};
use infuse_tdf::TdfLoggerSet;
use std::sync::Arc;

#[derive(Clone)]
pub struct TdfEmitter {
    loggers: Arc<TdfLoggerSet>,
}

impl TdfEmitter {
    pub fn new(loggers: Arc<TdfLoggerSet>) -> Self {
        TdfEmitter { loggers }
    }

    pub fn log(
        &self,
        sinks: &[TdfSink],
        tdf_bit: u32,
        tdf_id: TdfId,
        time: EpochTime,
        payload: &[u8],
    ) {
        for sink in sinks {
            if sink.tdf_mask & (1 << tdf_bit) != 0 {
                self.loggers.log(sink.loggers, tdf_id, time, payload);
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_array(
        &self,
        sinks: &[TdfSink],
        tdf_bit: u32,
        tdf_id: TdfId,
        elem_len: usize,
        count: u8,
        first: EpochTime,
        period: u32,
        payload: &[u8],
    ) {
        for sink in sinks {
            if sink.tdf_mask & (1 << tdf_bit) != 0 {
                self.loggers
                    .log_array(sink.loggers, tdf_id, elem_len, count, first, period, payload);
            }
        }
    }
}
