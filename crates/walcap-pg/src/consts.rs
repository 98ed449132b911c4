/// Replication slot every session streams from.
pub const SLOT_NAME: &str = "walcap_cdc";

/// Publication the decoder subscribes to.
pub const PUBLICATION_NAME: &str = "walcap_cdc";
