pub(crate) mod scoped_thread_local;
