//! The process-wide, read-only context threaded through the round
//! executor, receiver, and pulse — the explicit replacement for the
//! source's mutable globals (§9, §5).

use std::sync::Arc;

use crate::flag::FlagCodec;
use crate::probe::ProbeContext;
use crate::store::Store;

#[derive(Clone)]
pub struct AppContext {
    pub flags: FlagCodec,
    pub probe: ProbeContext,
    pub store: Arc<dyn Store>,
}

impl AppContext {
    pub fn new(flags: FlagCodec, probe: ProbeContext, store: Arc<dyn Store>) -> Self {
        Self { flags, probe, store }
    }
}
