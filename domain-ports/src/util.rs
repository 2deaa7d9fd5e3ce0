pub(crate) mod semaphore;
