//! 上传表单页面。

use axum::response::Html;

const UPLOAD_FORM: &str = r#"<!doctype html>
<title>Upload new File</title>
<h1>Upload new File</h1>
<form action="" method=post enctype=multipart/form-data>
  <p><input type=file name=file>
     <input type=submit value=Upload>
</form>
<p><a href="/list">Uploaded files</a></p>
"#;

/// 返回上传表单；表单提交被拒绝时也复用此页面。
pub fn upload_form_page() -> Html<&'static str> {
    Html(UPLOAD_FORM)
}

pub async fn upload_form() -> Html<&'static str> {
    upload_form_page()
}
