// Integration tests follow the organization suggested by Matklad:
// https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html

mod support;

mod deadlock;
mod domain_resolution;
mod event_dispatch;
mod fork_join;
mod request_dispatch;
