use crate::commands::common::{format_operation_lines, CliContext};
use crate::error::CliError;

pub fn run_list(as_json: bool, context: &CliContext) -> Result<(), CliError> {
    let runtime = context.open_queue()?;
    let operations = runtime.queue().get_queue();

    if as_json {
        println!("{}", serde_json::to_string_pretty(&operations)?);
        return Ok(());
    }

    if operations.is_empty() {
        println!("No pending sync operations.");
        return Ok(());
    }

    for line in format_operation_lines(&operations) {
        println!("{line}");
    }
    Ok(())
}
