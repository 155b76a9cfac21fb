use crate::commands::common::{format_stats_lines, CliContext};
use crate::error::CliError;

pub fn run_stats(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let runtime = context.open_queue()?;
    let stats = runtime.queue().get_queue_stats();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        for line in format_stats_lines(&stats) {
            println!("{line}");
        }
    }
    Ok(())
}
