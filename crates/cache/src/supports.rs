/// Lets a `Key` type declare that it "covers" some probe value, enabling
/// range-like lookups via [`crate::Cache::entry_for`].
///
/// A single `Key` may implement this any number of times for different
/// probe types `P` — e.g. an interval key might support both a point probe
/// and an interval-overlap probe.
pub trait Supports<P> {
    fn supports(&self, probe: &P) -> bool;
}
