// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Over-the-air installation manifests.
//!
//! iOS installs apps outside the App Store through an
//! `itms-services://?action=download-manifest&url=...` link pointing at an
//! XML plist manifest. The manifest schema here is consumed by the OS
//! installer; its keys are compatibility-critical and must not change.

use {crate::error::Result, std::io::Cursor};

/// Fixed bundle version declared in generated manifests.
const BUNDLE_VERSION: &str = "1";

/// Render the installation manifest for a signed archive.
///
/// Pure string formatting over the plist data model: one asset entry of kind
/// `software-package` pointing at `ipa_url`, and one metadata entry naming
/// the bundle identifier and title.
pub fn install_manifest(ipa_url: &str, bundle_id: &str, app_name: &str) -> Result<Vec<u8>> {
    let mut asset = plist::Dictionary::new();
    asset.insert("kind".to_string(), string_value("software-package"));
    asset.insert("url".to_string(), string_value(ipa_url));

    let mut metadata = plist::Dictionary::new();
    metadata.insert("bundle-identifier".to_string(), string_value(bundle_id));
    metadata.insert("bundle-version".to_string(), string_value(BUNDLE_VERSION));
    metadata.insert("kind".to_string(), string_value("software"));
    metadata.insert("title".to_string(), string_value(app_name));

    let mut item = plist::Dictionary::new();
    item.insert(
        "assets".to_string(),
        plist::Value::Array(vec![plist::Value::Dictionary(asset)]),
    );
    item.insert("metadata".to_string(), plist::Value::Dictionary(metadata));

    let mut root = plist::Dictionary::new();
    root.insert(
        "items".to_string(),
        plist::Value::Array(vec![plist::Value::Dictionary(item)]),
    );

    let mut data = vec![];
    plist::Value::Dictionary(root)
        .to_writer_xml(Cursor::new(&mut data))
        .map_err(crate::ResignError::ManifestSerialize)?;

    Ok(data)
}

fn string_value(value: &str) -> plist::Value {
    plist::Value::String(value.to_string())
}
