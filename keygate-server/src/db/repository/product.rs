//! Product Repository

use super::{BaseRepository, RepoError, RepoResult, content_of};
use shared::models::Product;
use surrealdb::Surreal;
use surrealdb::engine::local::Db;

const TABLE: &str = "product";

#[derive(Clone)]
pub struct ProductRepository {
    base: BaseRepository,
}

impl ProductRepository {
    pub fn new(db: Surreal<Db>) -> Self {
        Self {
            base: BaseRepository::new(db),
        }
    }

    pub async fn create(&self, product: &Product) -> RepoResult<()> {
        self.base
            .db()
            .query("CREATE type::thing($tb, $id) CONTENT $data")
            .bind(("tb", TABLE))
            .bind(("id", product.id.clone()))
            .bind(("data", content_of(product)?))
            .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, product_id: &str) -> RepoResult<Option<Product>> {
        let mut result = self
            .base
            .db()
            .query("SELECT *, record::id(id) AS id FROM type::thing($tb, $id)")
            .bind(("tb", TABLE))
            .bind(("id", product_id.to_string()))
            .await?;
        let products: Vec<Product> = result.take(0)?;
        Ok(products.into_iter().next())
    }

    pub async fn get(&self, product_id: &str) -> RepoResult<Product> {
        self.find_by_id(product_id)
            .await?
            .ok_or_else(|| RepoError::NotFound(format!("Product {product_id} not found")))
    }

    /// 市场商品 ID 反查（marketplace 路径映射外部条目）
    pub async fn find_by_marketplace_id(&self, marketplace_id: &str) -> RepoResult<Option<Product>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM product
                 WHERE marketplace_product_id = $mid LIMIT 1",
            )
            .bind(("mid", marketplace_id.to_string()))
            .await?;
        let products: Vec<Product> = result.take(0)?;
        Ok(products.into_iter().next())
    }

    pub async fn list_active(&self) -> RepoResult<Vec<Product>> {
        let mut result = self
            .base
            .db()
            .query(
                "SELECT *, record::id(id) AS id FROM product
                 WHERE active = true ORDER BY name ASC",
            )
            .await?;
        let products: Vec<Product> = result.take(0)?;
        Ok(products)
    }
}
