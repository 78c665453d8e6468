mod assets;

use proc_macro::TokenStream;

/// 在编译期按 glob 模式嵌入模板文件，展开为 `hbtpl::MemoryLoader`
///
/// ```ignore
/// let loader = hbtpl::embed_templates!("templates/**/*.hbs");
/// ```
///
/// Template names are the matched paths relative to the pattern's fixed
/// prefix, without extension (`templates/partials/header.hbs` →
/// `partials/header`).
#[proc_macro]
pub fn embed_templates(input: TokenStream) -> TokenStream {
    assets::embed_templates_impl(input)
}
