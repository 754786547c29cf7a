pub mod extraction_worker;
