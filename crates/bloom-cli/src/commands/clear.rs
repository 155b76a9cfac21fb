use crate::commands::common::CliContext;
use crate::error::CliError;

pub fn run_clear(confirmed: bool, context: &CliContext) -> Result<(), CliError> {
    let runtime = context.open_queue()?;
    let queue = runtime.queue();
    let pending = queue.len();

    if pending == 0 {
        println!("Sync queue is already empty.");
        return Ok(());
    }
    if !confirmed {
        return Err(CliError::ClearNotConfirmed(pending));
    }

    queue.clear_queue();
    println!("Cleared {pending} pending operations");
    Ok(())
}
