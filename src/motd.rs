use anyhow::{Context, Result};
use camino::Utf8Path;

use crate::config::BuildConfig;

/// Login banner shown by the image.
pub fn motd(config: &BuildConfig) -> String {
    format!(
        r#"   __        .                   .
 _|  |_      | .-. .  . .-. :--. |-
|_    _|     ;|   ||  |(.-' |  | |
  |__|   `--'  `-' `;-| `-' '  ' `-'
                   /  ;  Instance ({display_name} {build_date})
                   `-'   {docs_url}

"#,
        display_name = config.display_name,
        build_date = config.build_date,
        docs_url = config.docs_url,
    )
}

/// Contents of `/etc/product`.
pub fn product(config: &BuildConfig) -> String {
    format!(
        "Name: Instance\n\
         Image: {} {}\n\
         Documentation: {}\n\
         Description: {}\n",
        config.display_name, config.build_date, config.docs_url, config.description
    )
}

pub fn write_motd_and_product(root: &Utf8Path, config: &BuildConfig) -> Result<()> {
    let etc = root.join("etc");
    std::fs::create_dir_all(&etc).with_context(|| format!("creating {etc}"))?;

    let path = etc.join("motd");
    std::fs::write(&path, motd(config)).with_context(|| format!("writing {path}"))?;

    let path = etc.join("product");
    std::fs::write(&path, product(config)).with_context(|| format!("writing {path}"))?;
    Ok(())
}
