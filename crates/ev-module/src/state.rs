/// Bootstrap state of a [`crate::ModulePeer`]. Monotonic: `Constructed` →
/// `Booted` → `Initialized`, no transitions back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootstrapState {
    Constructed,
    Booted,
    Initialized,
}
