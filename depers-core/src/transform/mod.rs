//! C5, the transformer family: a tagged variant over the six methods, dispatching to whichever
//! variant's struct actually implements a given batch through one shared `#[macro_rules]` block
//! instead of a trait object, so each variant can expose a different constructor shape while the
//! batch-driving code (`pipeline::run`) stays generic over `Method`.

mod aggregate;
mod copy;
mod random_select;
mod reduce_aggregate;
mod shuffle;
mod uuid_replace;

pub use aggregate::{Aggregate, ColumnOp};
pub use copy::Copy as CopyMethod;
pub use random_select::RandomSelect;
pub use reduce_aggregate::ReduceAggregate;
pub use shuffle::Shuffle;
pub use uuid_replace::UuidReplace;

use tokio_postgres::Client;

use crate::db::ColumnDef;
use crate::error::Result;

/// One transformation method, tagged by variant. Mirrors the settings file's `method` enum.
pub enum Method {
    /// Column-wise copy.
    Copy(CopyMethod),
    /// Windowed aggregation, one output row per input row.
    Aggregate(Aggregate),
    /// Reducing aggregation, one output row per batch.
    ReduceAggregate(ReduceAggregate),
    /// Within-group shuffle.
    Shuffle(Shuffle),
    /// One randomly chosen row per group per batch.
    RandomSelect(RandomSelect),
    /// UUID replacement with per-column mapping tables.
    UuidReplace(UuidReplace),
}

/// Dispatches `$call` to whichever variant `$self` holds, binding the inner value to `$inner`.
macro_rules! dispatch {
    ($self:expr, $inner:ident, $call:expr) => {
        match $self {
            Method::Copy($inner) => $call,
            Method::Aggregate($inner) => $call,
            Method::ReduceAggregate($inner) => $call,
            Method::Shuffle($inner) => $call,
            Method::RandomSelect($inner) => $call,
            Method::UuidReplace($inner) => $call,
        }
    };
}

impl Method {
    /// Ordered `(name, type)` pairs XFER is created with.
    pub fn output_schema(&self) -> Vec<ColumnDef> {
        dispatch!(self, m, m.output_schema())
    }

    /// Create the method's types/functions/aux tables on the source cluster.
    pub async fn prepare(&self, src: &Client) -> Result<()> {
        dispatch!(self, m, m.prepare(src).await)
    }

    /// Ordered names of the set-returning functions whose concatenated `(f()).*` columns yield
    /// the method's output row(s) for the current batch.
    pub fn producer_funcs(&self) -> Vec<String> {
        dispatch!(self, m, m.producer_funcs())
    }

    /// Drop everything `prepare` created.
    pub async fn cleanup(&self, src: &Client) -> Result<()> {
        dispatch!(self, m, m.cleanup(src).await)
    }

    /// True only for [`RandomSelect`]: a batch smaller than `batch_size` is dropped rather than
    /// processed, since "one random row per group" has no well-defined meaning for a partial
    /// group composition that will never recur.
    pub fn skip_last_partial_batch(&self) -> bool {
        dispatch!(self, m, m.skip_last_partial_batch())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_random_select_skips_partial_batches() {
        let copy =
            Method::Copy(CopyMethod::new("workers".into(), vec![("a".into(), "text".into())]));
        assert!(!copy.skip_last_partial_batch());

        let select = Method::RandomSelect(RandomSelect::new(
            "workers".into(),
            vec![vec![("a".into(), "text".into())]],
        ));
        assert!(select.skip_last_partial_batch());
    }
}
