use crate::{
    error::{MarketError, Result},
    model::{CreateGenreRequest, Genre},
    repository::GenreRepository,
    GenreId,
};
use std::sync::Arc;

/// Genre catalogue. Books link to genres when listed.
#[derive(Clone)]
pub struct GenreService {
    genres: Arc<dyn GenreRepository>,
}

impl GenreService {
    pub fn new(genres: Arc<dyn GenreRepository>) -> Self {
        Self { genres }
    }

    pub async fn create_genre(&self, request: CreateGenreRequest) -> Result<Genre> {
        let name = request.validate()?;
        let genre = self.genres.create_genre(name).await?;
        tracing::info!(genre_id = genre.id, name = %genre.name, "genre created");
        Ok(genre)
    }

    pub async fn get_genre(&self, genre_id: GenreId) -> Result<Genre> {
        if genre_id <= 0 {
            return Err(MarketError::InvalidId);
        }
        self.genres
            .get_genre(genre_id)
            .await?
            .ok_or(MarketError::GenreNotFound(genre_id))
    }

    pub async fn list_genres(&self) -> Result<Vec<Genre>> {
        self.genres.list_genres().await
    }

    pub async fn delete_genre(&self, genre_id: GenreId) -> Result<()> {
        if genre_id <= 0 {
            return Err(MarketError::InvalidId);
        }
        self.genres.delete_genre(genre_id).await?;
        tracing::info!(genre_id, "genre deleted");
        Ok(())
    }
}
