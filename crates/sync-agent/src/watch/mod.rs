mod notify_source;

pub use notify_source::NotifyEventSource;
