use proc_macro::TokenStream;
use quote::quote;
use std::env;
use std::path::{Component, Path, PathBuf};
use syn::{LitStr, parse_macro_input};

pub fn embed_templates_impl(input: TokenStream) -> TokenStream {
    // 1. 解析 glob 模式字面量
    let pattern = parse_macro_input!(input as LitStr);
    let pattern_str = pattern.value();

    // 2. 相对路径基于 CARGO_MANIFEST_DIR
    let Ok(manifest_dir) = env::var("CARGO_MANIFEST_DIR") else {
        return syn::Error::new(pattern.span(), "编译环境异常：未设置 CARGO_MANIFEST_DIR 环境变量")
            .to_compile_error()
            .into();
    };
    let root = PathBuf::from(manifest_dir);
    let full_pattern = root.join(&pattern_str);
    let base = fixed_prefix(&full_pattern);

    // 3. 查找匹配的文件
    let mut files: Vec<PathBuf> = match glob::glob(&full_pattern.to_string_lossy()) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .filter(|path| path.is_file())
            .collect(),
        Err(e) => {
            return syn::Error::new(pattern.span(), format!("无效的 glob 模式: {}", e))
                .to_compile_error()
                .into();
        }
    };
    files.sort();

    // 4. 名称 = 相对固定前缀的路径，去掉扩展名
    let mut entries = Vec::with_capacity(files.len());
    for file in &files {
        let Some(name) = template_name(&base, file) else {
            return syn::Error::new(
                pattern.span(),
                format!("无法为文件生成模板名: {}", file.display()),
            )
            .to_compile_error()
            .into();
        };
        let path = file.to_string_lossy().to_string();
        entries.push(quote! { (#name, include_str!(#path)) });
    }

    let output = quote! {
        ::hbtpl::MemoryLoader::from_assets(vec![
            #(#entries),*
        ])
    };
    output.into()
}

/// Leading components of `pattern` that contain no glob metacharacters.
fn fixed_prefix(pattern: &Path) -> PathBuf {
    pattern
        .components()
        .take_while(|c| {
            !c.as_os_str()
                .to_string_lossy()
                .contains(['*', '?', '[', '{'])
        })
        .collect()
}

fn template_name(base: &Path, file: &Path) -> Option<String> {
    // 模式没有通配符时，前缀即文件本身
    let relative = match file.strip_prefix(base) {
        Ok(rel) if !rel.as_os_str().is_empty() => rel.with_extension(""),
        _ => PathBuf::from(file.file_stem()?),
    };
    let parts = relative
        .components()
        .map(|c| match c {
            Component::Normal(part) => part.to_str(),
            _ => None,
        })
        .collect::<Option<Vec<_>>>()?;
    Some(parts.join("/"))
}
