// A poisoned lock means a completion was being settled when a thread panicked; we cannot tell
// which outcome readers should observe, so we refuse to continue (we panic).
pub(crate) const ERR_POISONED_LOCK: &str = "encountered poisoned lock - the outcome of the \
    completion can no longer be trusted";
