pub mod product;
pub mod tax;
pub mod region;

pub use product::{CatalogProduct, InMemoryProductProvider, ItemData, Product, ProductError, ProductProvider};
pub use tax::{TaxConfiguration, TaxConfigurationInTime, TaxError, TaxRateSnapshot};
pub use region::{Region, TaxRegistry};
