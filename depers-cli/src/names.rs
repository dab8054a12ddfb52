//! Fixed object names the run controller coordinates around, the Rust analogue of
//! `original_source/src/names.py` (not present in the retrieved pack, reconstructed from its
//! usages in `main.py`/`depers_and_replicate.py`: `PUBLICATION`, `SUBSCRIPTION`, `ID_COLUMN`).
//! `src_table`/`transfer_table` come from settings rather than being fixed constants, since a
//! single binary serves arbitrarily many source tables.

/// Name of the publication created on the source cluster in replicated mode.
pub const PUBLICATION: &str = "transfer_pub";
/// Name of the subscription created on every destination cluster in replicated mode.
pub const SUBSCRIPTION: &str = "transfer_sub";
/// Identity column on the transfer table.
pub const ID_COLUMN: &str = "xfer_id";
