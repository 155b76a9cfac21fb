use bloom_core::{EntityType, OperationType};

use crate::commands::common::{parse_payload, require_entity_id, CliContext};
use crate::error::CliError;

pub fn run_add(
    entity_type: EntityType,
    operation_type: OperationType,
    entity_id: Option<String>,
    data: &str,
    context: &CliContext,
) -> Result<(), CliError> {
    let entity_id = require_entity_id(operation_type, entity_id)?;
    let payload = parse_payload(data)?;

    let runtime = context.open_queue()?;
    let id = runtime
        .queue()
        .enqueue(entity_type, operation_type, payload, entity_id);
    println!("{id}");
    Ok(())
}
