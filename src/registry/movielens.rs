//! Built-in MovieLens layout.
//!
//! Ratings are stored twice: keyed by user then movie, and keyed by movie then
//! user, so both "all ratings by a user" and "all ratings of a movie" are
//! prefix scans.

use super::{DatasetSpec, RowKeySpec};

pub(super) fn datasets() -> Vec<DatasetSpec> {
    vec![
        DatasetSpec::new(
            "movies",
            "movies.csv",
            "movies",
            "info",
            RowKeySpec::single("movieId"),
            ["title", "genres"],
        ),
        DatasetSpec::new(
            "ratings",
            "ratings.csv",
            "ratings",
            "data",
            RowKeySpec::composite(["userId", "movieId"]),
            ["rating", "timestamp"],
        )
        .large(20),
        DatasetSpec::new(
            "movie_ratings",
            "ratings.csv",
            "movie_ratings",
            "data",
            RowKeySpec::composite(["movieId", "userId"]),
            ["rating", "timestamp"],
        )
        .large(20),
        DatasetSpec::new(
            "tags",
            "tags.csv",
            "tags",
            "data",
            RowKeySpec::composite(["userId", "movieId", "timestamp"]),
            ["tag"],
        ),
        DatasetSpec::new(
            "links",
            "links.csv",
            "links",
            "external",
            RowKeySpec::single("movieId"),
            ["imdbId", "tmdbId"],
        ),
    ]
}
