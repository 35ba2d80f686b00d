pub mod align;
pub mod size_class;
