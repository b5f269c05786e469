fn main() -> anyhow::Result<()> {
    committelemetry::cli::dump_telemetry()
}
