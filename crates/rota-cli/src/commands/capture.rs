use rota_core::{ActionFields, ActionKind, CaptureRequest};

use super::common::{open_queue, OpenQueueMode, QueueOptions};
use crate::cli::{OrderArgs, ReceiverArgs};
use crate::error::CliError;

pub async fn run_receiver_capture(
    kind: ActionKind,
    args: ReceiverArgs,
    options: &QueueOptions,
) -> Result<(), CliError> {
    let fields = ActionFields::Receiver {
        receiver_name: args.receiver,
        receiver_type: args.receiver_type.into(),
    };
    enqueue(build_request(kind, args.order, fields)?, options).await
}

pub async fn run_failed_capture(
    order: OrderArgs,
    reason: String,
    options: &QueueOptions,
) -> Result<(), CliError> {
    let fields = ActionFields::Failure { reason };
    enqueue(
        build_request(ActionKind::FailedAttempt, order, fields)?,
        options,
    )
    .await
}

pub async fn run_collection_capture(
    order: OrderArgs,
    options: &QueueOptions,
) -> Result<(), CliError> {
    enqueue(
        build_request(ActionKind::Collection, order, ActionFields::Empty)?,
        options,
    )
    .await
}

async fn enqueue(request: CaptureRequest, options: &QueueOptions) -> Result<(), CliError> {
    let queue = open_queue(options, OpenQueueMode::Local).await?;
    let id = queue.enqueue(request).await?;
    println!("{id}");
    Ok(())
}

/// Photo paths are stored absolute so a later drain finds them from any
/// working directory.
pub fn build_request(
    kind: ActionKind,
    order: OrderArgs,
    fields: ActionFields,
) -> Result<CaptureRequest, CliError> {
    let photo_path = match order.photo {
        Some(path) => {
            let absolute = std::path::absolute(&path)?;
            let text = absolute
                .to_str()
                .ok_or_else(|| CliError::InvalidPhotoPath(absolute.display().to_string()))?;
            Some(text.to_string())
        }
        None => None,
    };

    Ok(CaptureRequest {
        barcode: order.barcode,
        expected_barcode: order.expected,
        kind,
        fields,
        photo_path,
    })
}
