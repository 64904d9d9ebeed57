//! # Seed Data Generator
//!
//! Populates a development database with a small content tree.
//!
//! ## Usage
//! ```bash
//! # 3 books (default), each with chapters and topics
//! DATABASE_URL=postgres://localhost/syllabus cargo run -p syllabus-db --bin seed
//!
//! # Custom amount
//! cargo run -p syllabus-db --bin seed -- --books 20
//! ```
//!
//! ## Generated Content
//! Every book gets [`CHAPTERS_PER_BOOK`] chapters and every chapter gets
//! [`TOPICS_PER_CHAPTER`] topics. Ids are deterministic (`seed-book-1`,
//! `seed-book-1-ch-2`, ...) so re-running the seed upserts the same rows
//! instead of duplicating them.

use std::env;

use syllabus_core::{Book, Chapter, Topic};
use syllabus_db::{Database, DbConfig};
use tracing_subscriber::EnvFilter;

const CHAPTERS_PER_BOOK: i32 = 4;
const TOPICS_PER_CHAPTER: i32 = 5;

/// Subjects rotated across books
const SUBJECTS: &[(&str, &str)] = &[
    ("SUBJECT_MATHS", "Mathematics"),
    ("SUBJECT_PHYSICS", "Physics"),
    ("SUBJECT_CHEMISTRY", "Chemistry"),
    ("SUBJECT_BIOLOGY", "Biology"),
    ("SUBJECT_LITERATURE", "Literature"),
    ("SUBJECT_ENGLISH", "English"),
];

const COUNTRY: &str = "COUNTRY_VN";
const SCHOOL_ID: i32 = 1;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args: Vec<String> = env::args().collect();

    let mut book_count: usize = 3;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--books" | "-b" => {
                if i + 1 < args.len() {
                    book_count = args[i + 1].parse().unwrap_or(3);
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Syllabus Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -b, --books <N>    Number of books to generate (default: 3)");
                println!("  -h, --help         Show this help message");
                println!();
                println!("Environment:");
                println!("  DATABASE_URL       Postgres connection string (required)");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🌱 Syllabus Seed Data Generator");
    println!("==============================");
    println!("Books: {}", book_count);
    println!();

    let config = DbConfig::from_env()?;
    let db = Database::new(config).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let start = std::time::Instant::now();

    let mut books = Vec::with_capacity(book_count);
    let mut chapters = Vec::new();
    let mut topics = Vec::new();

    for b in 1..=book_count {
        let (subject, title) = SUBJECTS[(b - 1) % SUBJECTS.len()];
        let grade = (b % 12) as i32 + 1;
        let book = generate_book(b, subject, title, grade);

        for c in 1..=CHAPTERS_PER_BOOK {
            let chapter = generate_chapter(&book, c);
            for t in 1..=TOPICS_PER_CHAPTER {
                topics.push(generate_topic(&chapter, t));
            }
            chapters.push(chapter);
        }
        books.push(book);
    }

    let tx = db.begin().await?;

    db.books().upsert(&tx, &mut books).await?;
    println!("  Upserted {} books", books.len());

    db.chapters().upsert(&tx, &mut chapters).await?;
    println!("  Upserted {} chapters", chapters.len());

    db.topics().bulk_import(&tx, &mut topics).await?;
    println!("  Upserted {} topics", topics.len());

    for book in &books {
        db.books()
            .update_current_chapter_display_order(&tx, &book.book_id, CHAPTERS_PER_BOOK)
            .await?;
    }
    for chapter in &chapters {
        db.chapters()
            .update_current_topic_display_order(&tx, &chapter.chapter_id, TOPICS_PER_CHAPTER)
            .await?;
    }

    tx.commit().await?;

    println!();
    println!(
        "✓ Seeded {} books, {} chapters, {} topics in {:?}",
        books.len(),
        chapters.len(),
        topics.len(),
        start.elapsed()
    );

    Ok(())
}

fn generate_book(index: usize, subject: &str, title: &str, grade: i32) -> Book {
    let mut book = Book::new(format!("seed-book-{}", index), format!("{} {}", title, grade));
    book.country = Some(COUNTRY.to_string());
    book.subject = Some(subject.to_string());
    book.grade = Some(grade);
    book.school_id = SCHOOL_ID;
    book
}

fn generate_chapter(book: &Book, index: i32) -> Chapter {
    let mut chapter = Chapter::new(
        format!("{}-ch-{}", book.book_id, index),
        format!("Chapter {}", index),
    );
    chapter.country = book.country.clone();
    chapter.subject = book.subject.clone();
    chapter.grade = book.grade;
    chapter.display_order = index;
    chapter.school_id = book.school_id;
    chapter.book_id = Some(book.book_id.clone());
    chapter
}

fn generate_topic(chapter: &Chapter, index: i32) -> Topic {
    let mut topic = Topic::new(
        format!("{}-tp-{}", chapter.chapter_id, index),
        format!("{} Topic {}", chapter.name, index),
    );
    topic.country = chapter.country.clone();
    topic.subject = chapter.subject.clone();
    topic.grade = chapter.grade;
    topic.display_order = index;
    topic.school_id = chapter.school_id;
    topic.chapter_id = Some(chapter.chapter_id.clone());
    topic
}
