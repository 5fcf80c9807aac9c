fn main() -> anyhow::Result<()> {
    benchy::run()
}
