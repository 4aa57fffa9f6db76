use anyhow::Result;

fn main() -> Result<()> {
    xlsx_add_windows::cli::run()
}
