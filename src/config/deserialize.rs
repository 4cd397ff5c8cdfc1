// ABOUTME: Custom serde deserializers for config types.
// ABOUTME: Handles non-empty command lists and image references.

use nonempty::NonEmpty;
use serde::Deserialize;

use crate::types::ImageRef;

pub fn deserialize_command<'de, D>(deserializer: D) -> Result<Option<NonEmpty<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<Vec<String>> = Option::deserialize(deserializer)?;
    match opt {
        None => Ok(None),
        Some(args) => NonEmpty::from_vec(args)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom("command cannot be empty")),
    }
}

pub fn deserialize_image<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let opt: Option<String> = Option::deserialize(deserializer)?;
    if let Some(image) = &opt {
        ImageRef::parse(image).map_err(serde::de::Error::custom)?;
    }
    Ok(opt)
}
