//! CSV fixtures shared by unit and integration tests

/// Iris-like measurements: 150 rows, four numerical columns and a `species` column with three
/// classes of 50 rows each, in that order
pub fn iris_csv() -> String {
    let species = ["setosa", "versicolor", "virginica"];
    let mut csv = String::from("sepal_length,sepal_width,petal_length,petal_width,species\n");
    for row in 0..150 {
        let class = row / 50;
        let step = (row % 50) as f64;
        let sepal_length = 4.5 + class as f64 + (step % 10.0) / 10.0;
        let sepal_width = 3.0 + (step % 5.0) / 10.0 - class as f64 * 0.2;
        let petal_length = 1.2 + class as f64 * 2.0 + (step % 7.0) / 10.0;
        let petal_width = 0.2 + class as f64 * 0.8 + (step % 4.0) / 10.0;
        csv.push_str(&format!(
            "{sepal_length:.1},{sepal_width:.1},{petal_length:.1},{petal_width:.1},{}\n",
            species[class]
        ));
    }
    csv
}
