fn main() -> anyhow::Result<()>
{
        webtex::run_webtex()
}
