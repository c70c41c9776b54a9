use anyhow::Result;

fn main() -> Result<()> {
    rustbox_cloner::cli::run()
}
