fn main() -> anyhow::Result<()> {
    dayflow_lib::run()
}
