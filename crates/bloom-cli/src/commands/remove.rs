use crate::commands::common::{normalize_operation_identifier, resolve_operation_id, CliContext};
use crate::error::CliError;

pub fn run_remove(id: &str, context: &CliContext) -> Result<(), CliError> {
    let query = normalize_operation_identifier(id)?;
    let runtime = context.open_queue()?;
    let queue = runtime.queue();

    let resolved = resolve_operation_id(&query, &queue.get_queue())?;
    if !queue.remove_from_queue(resolved) {
        return Err(CliError::OperationNotFound(query));
    }
    println!("{resolved}");
    Ok(())
}
