mod catalog_cache;
pub mod descriptor;
mod schema;

pub use self::{
    catalog_cache::CatalogCache,
    descriptor::{DescriptorRef, DescriptorStore, KeySpec},
    schema::{AttributeHeader, KeyType, Schema},
};
