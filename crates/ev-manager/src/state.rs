/// Per-module handshake state: `NotStarted -> NotSeen -> SaidHello ->
/// InitFinished`. `NotStarted` is the state no module should still be in
/// once the manager has finished spawning subprocesses; a `say_hello` that
/// arrives while a module is still `NotStarted` is rejected as "time
/// travel" — the module answering before the manager has even scheduled it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleState {
    NotStarted,
    NotSeen,
    SaidHello,
    InitFinished,
}
