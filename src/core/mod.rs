/// Daily totals and cycle summaries
pub mod calendar;
/// Envelope CRUD, visibility and posting
pub mod envelope;
/// Free tier limits and persistent envelope expiry
pub mod feature_gate;
/// Monthly copies of recurring envelopes and transactions
pub mod materializer;
/// Renewal day and cycle arithmetic
pub mod renewal;
/// Typed access to the `system_state` key-value table
pub mod settings;
/// Subscription tiers and store integration
pub mod subscription;
/// Transaction CRUD with envelope posting
pub mod transaction;
