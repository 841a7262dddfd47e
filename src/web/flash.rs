use tower_sessions::Session;

use crate::error::AdtoonError;

const FLASH_FLAG_KEY: &str = "flash_flag";

pub(crate) const FLASH_SCENES_READY: u16 = 1;
pub(crate) const FLASH_SCENES_FAILED: u16 = 2;
pub(crate) const FLASH_NARRATIVE_REQUIRED: u16 = 3;
pub(crate) const FLASH_SCENES_REQUIRED: u16 = 4;
pub(crate) const FLASH_IMAGE_READY: u16 = 5;
pub(crate) const FLASH_IMAGE_FAILED: u16 = 6;
pub(crate) const FLASH_BATCH_STARTED: u16 = 7;
pub(crate) const FLASH_WORKSPACE_CLEARED: u16 = 8;

#[derive(Clone, Debug)]
pub(crate) struct FlashMessage {
    pub(crate) text: &'static str,
    pub(crate) class: &'static str,
}

pub(crate) async fn set_flash(session: &Session, flag: u16) -> Result<(), AdtoonError> {
    session
        .insert(FLASH_FLAG_KEY, flag)
        .await
        .map_err(|err| AdtoonError::InternalServerError(err.to_string()))?;
    Ok(())
}

pub(crate) async fn take_flash_message(
    session: &Session,
) -> Result<Option<FlashMessage>, AdtoonError> {
    let flag = session
        .remove::<u16>(FLASH_FLAG_KEY)
        .await
        .map_err(|err| AdtoonError::InternalServerError(err.to_string()))?;
    Ok(flag.and_then(message_for))
}

fn message_for(flag: u16) -> Option<FlashMessage> {
    let (text, class) = match flag {
        FLASH_SCENES_READY => ("18 scenes generated and saved.", "success"),
        FLASH_SCENES_FAILED => (
            "Scene generation failed, see the error log below.",
            "error",
        ),
        FLASH_NARRATIVE_REQUIRED => ("Please enter a narrative first.", "warning"),
        FLASH_SCENES_REQUIRED => ("Generate scenes before making images.", "warning"),
        FLASH_IMAGE_READY => ("Scene image generated.", "success"),
        FLASH_IMAGE_FAILED => (
            "Image generation failed, see the error log below.",
            "error",
        ),
        FLASH_BATCH_STARTED => (
            "Batch started. Images are generated one at a time with a pause between each.",
            "success",
        ),
        FLASH_WORKSPACE_CLEARED => ("Workspace cleared.", "success"),
        _ => return None,
    };
    Some(FlashMessage { text, class })
}
