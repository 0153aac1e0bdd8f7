/*! Integration tests for Livenode.
 *
 * This test suite is organized as a single integration test binary
 * following the pattern described by matklad in
 * https://matklad.github.io/2021/02/27/delete-cargo-integration-tests.html
 *
 * - events: The mutation pipeline as seen by listeners and interceptors
 * - arrays: Array nodes, moves and reconciling replacements
 * - meta: Validation rules, defaults and meta management
 * - buffering: Input, output and bubble buffers
 * - snapshot: Snapshots and reverts of node trees
 * - replication: Local replication and links over the in-memory transport
 */

use tracing_subscriber::EnvFilter;

#[ctor::ctor]
fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("livenode=info".parse().unwrap()),
        )
        .with_test_writer()
        .try_init();
}

mod arrays;
mod buffering;
mod events;
mod helpers;
mod meta;
mod replication;
mod snapshot;
