pub mod batch;
pub mod namespace;
pub mod template_param;

pub use batch::BatchWrapper;
pub use namespace::NamespaceWrapper;
pub use template_param::TemplateParamWrapper;
