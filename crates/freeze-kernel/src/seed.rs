//! Curated baseline rows, inserted once per empty module table.

use serde_json::{json, Map, Value};

fn rows(raw: Value) -> Vec<Map<String, Value>> {
    match raw {
        Value::Array(items) => items
            .into_iter()
            .filter_map(|v| match v {
                Value::Object(m) => Some(m),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    }
}

pub(crate) fn baseline_rows() -> Vec<(&'static str, Vec<Map<String, Value>>)> {
    vec![
        (
            "books",
            rows(json!([
                {"title": "The Great Gatsby", "author": "F. Scott Fitzgerald", "isbn": "978-0743273565", "genre": "Fiction", "year": 1925, "available": 1},
                {"title": "To Kill a Mockingbird", "author": "Harper Lee", "isbn": "978-0446310789", "genre": "Fiction", "year": 1960, "available": 1},
                {"title": "1984", "author": "George Orwell", "isbn": "978-0451524935", "genre": "Dystopian", "year": 1949, "available": 1},
                {"title": "Clean Code", "author": "Robert C. Martin", "isbn": "978-0132350884", "genre": "Technology", "year": 2008, "available": 1},
                {"title": "The Pragmatic Programmer", "author": "David Thomas", "isbn": "978-0135957059", "genre": "Technology", "year": 2019, "available": 1}
            ])),
        ),
        (
            "menu_items",
            rows(json!([
                {"name": "Grilled Salmon", "description": "Fresh Atlantic salmon with herbs", "price": 24.99, "category": "Main Course", "is_available": 1},
                {"name": "Caesar Salad", "description": "Crispy romaine with parmesan", "price": 12.99, "category": "Appetizer", "is_available": 1},
                {"name": "Margherita Pizza", "description": "Classic tomato and mozzarella", "price": 16.99, "category": "Main Course", "is_available": 1},
                {"name": "Chocolate Lava Cake", "description": "Warm chocolate cake with ice cream", "price": 9.99, "category": "Dessert", "is_available": 1},
                {"name": "Espresso", "description": "Double shot Italian espresso", "price": 4.99, "category": "Beverage", "is_available": 1}
            ])),
        ),
        (
            "tasks",
            rows(json!([
                {"title": "Setup Development Environment", "description": "Install toolchains and Docker", "status": "completed", "priority": "high", "due_date": "2026-03-01", "assigned_to": "Alaadin"},
                {"title": "Design Database Schema", "description": "Create ERD and normalize tables", "status": "in_progress", "priority": "high", "due_date": "2026-03-05", "assigned_to": "Alaadin"},
                {"title": "Write Unit Tests", "description": "Cover all API endpoints", "status": "pending", "priority": "medium", "due_date": "2026-03-10"},
                {"title": "Deploy to Production", "description": "Setup CI/CD pipeline", "status": "pending", "priority": "high", "due_date": "2026-03-15"}
            ])),
        ),
        (
            "students",
            rows(json!([
                {"name": "Alice Johnson", "email": "alice@university.edu", "student_id": "STU001", "major": "Computer Science", "gpa": 3.8, "enrollment_year": 2023},
                {"name": "Bob Smith", "email": "bob@university.edu", "student_id": "STU002", "major": "Mathematics", "gpa": 3.5, "enrollment_year": 2022},
                {"name": "Carol White", "email": "carol@university.edu", "student_id": "STU003", "major": "Physics", "gpa": 3.9, "enrollment_year": 2024}
            ])),
        ),
        (
            "notes",
            rows(json!([
                {"title": "Meeting Notes", "content": "Discussed Q1 roadmap and sprint planning", "category": "Work", "is_pinned": 1},
                {"title": "Shopping List", "content": "Milk, bread, eggs, coffee", "category": "Personal", "is_pinned": 0},
                {"title": "API Design Tips", "content": "Use proper HTTP methods and status codes", "category": "Learning", "is_pinned": 1}
            ])),
        ),
        (
            "blog_posts",
            rows(json!([
                {"title": "Getting Started with REST APIs", "content": "REST is an architectural style for designing networked applications.", "author": "Admin", "tags": "api,rest,beginner", "is_published": 1},
                {"title": "Understanding HTTP Methods", "content": "GET retrieves data, POST creates resources, PUT updates, DELETE removes.", "author": "Admin", "tags": "http,methods,tutorial", "is_published": 1},
                {"title": "API Security Best Practices", "content": "Always use HTTPS, authenticate properly, validate inputs, rate limit.", "author": "Admin", "tags": "security,api,best-practices", "is_published": 1}
            ])),
        ),
        (
            "inventory",
            rows(json!([
                {"name": "Laptop", "sku": "LAP-001", "quantity": 50, "price": 999.99, "category": "Electronics", "warehouse": "Warehouse A"},
                {"name": "Wireless Mouse", "sku": "MOU-002", "quantity": 200, "price": 29.99, "category": "Accessories", "warehouse": "Warehouse A"},
                {"name": "USB-C Cable", "sku": "CAB-003", "quantity": 500, "price": 9.99, "category": "Accessories", "warehouse": "Warehouse B"},
                {"name": "Monitor 27\"", "sku": "MON-004", "quantity": 30, "price": 349.99, "category": "Electronics", "warehouse": "Warehouse A"}
            ])),
        ),
    ]
}
