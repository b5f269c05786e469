use committelemetry::cli;
use committelemetry::limits::{AddressSpaceLimiter, MemoryLimit, MEM_LIMIT};
use committelemetry::entrypoint::run_with_memory_limit;

fn main() -> anyhow::Result<()> {
    run_with_memory_limit(
        &AddressSpaceLimiter,
        MemoryLimit::fixed(MEM_LIMIT),
        cli::process_queue_messages,
    )
}
