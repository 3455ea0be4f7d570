use anyhow::Result;

fn main() -> Result<()> {
    handlefree::cli::run()
}
